//! Tracking of the chain head and the window of live branches.

mod state;
mod tracker;

pub use state::{window_floor, RecentBlocks};
pub use tracker::{ActiveBranches, HeadTracker, TrackerError, TrackerParams};
