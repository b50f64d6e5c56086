//! Relay configuration, loaded from TOML by the binary.

mod bundles;
mod config;
mod scheduling;

pub use bundles::BundleConfig;
pub use config::*;
pub use scheduling::{Breakpoint, MonitorConfig, RightsConfig, WindowSource};
