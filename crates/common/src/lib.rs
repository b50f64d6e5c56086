//! Crate includes reusable utils for the relay services that handle common
//! behavior, such as initializing the tracing framework and retrying calls
//! against the node.

pub mod logging;
pub mod retry;
