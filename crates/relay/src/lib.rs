//! Scheduling core of the relay: follows the chain head, keeps upcoming
//! baking rights resolved to endpoints, and drives pending bundles to a
//! terminal state.

pub mod bundles;
pub mod constants;
pub mod head;
pub mod metrics;
pub mod observer;
pub mod rights;
pub mod window;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
