//! Baking rights for upcoming windows, resolved against the endpoint
//! registry.

mod cache;
mod fetch;
mod task;

pub use cache::AssignmentCache;
pub use fetch::{fetch_window_assignments, RightsError};
pub use task::{rights_task, RightsParams, RightsService};
