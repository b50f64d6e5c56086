//! Lifecycle of relayed bundles.

mod engine;
mod error;
mod pending;
mod task;

pub use engine::BundleRelay;
pub use error::InjectError;
pub use pending::{PendingBundle, PendingSet};
pub use task::bundle_relay_task;
