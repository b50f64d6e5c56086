use flashbake_primitives::prelude::*;
use flashbake_tezosio::codec::{CodecError, PrecheckError};
use thiserror::Error;

/// Why an injection was refused.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("bundle has no transactions")]
    Empty,

    #[error("relay has not caught up with the chain yet")]
    NotReady,

    #[error("could not parse operation: {0}")]
    Parse(#[from] CodecError),

    #[error("operation refused: {0}")]
    Precheck(#[from] PrecheckError),

    #[error("operation {0} is already pending")]
    Duplicate(OperationHash),
}
