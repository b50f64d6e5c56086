pub use crate::{
    block::BlockRef,
    bundle::BundleRequest,
    hash::{BlockHash, OperationHash, ScriptExprHash},
    params::ChainConstants,
    rights::{Address, Assignment},
};
