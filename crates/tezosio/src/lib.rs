//! Input-output with the Tezos node and the bakers the relay talks to.

pub mod codec;
pub mod registry;
pub mod rpc;
pub mod transport;
