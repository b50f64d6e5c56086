//! Collection of chain data types shared by the relay crates.

#[macro_use]
mod macros;

pub mod block;
pub mod bundle;
pub mod hash;
pub mod params;
pub mod rights;

pub mod prelude;
