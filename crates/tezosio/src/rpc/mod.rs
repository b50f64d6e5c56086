pub mod client;
pub mod error;
mod stream;
pub mod traits;
pub mod types;

pub use client::{ClientResult, TezosClient};
pub use stream::HeadStream;
