//! Error types for the RPC client.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// The error type for errors produced by the node client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Node answered 404 for the requested resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP status error, not retryable
    #[error("Obtained failure status({0}): {1}")]
    Status(u16, String),

    #[error("Error parsing rpc response: {0}")]
    Parse(String),

    /// Error creating the request body
    #[error("Could not create RPC Param: {0}")]
    Param(String),

    /// Body error, unlikely to be recoverable by retrying
    #[error("{0}")]
    Body(String),

    /// Error decoding the response, retry might not help
    #[error("Malformed Response: {0}")]
    MalformedResponse(String),

    /// Connection error, retry might help
    #[error("Could not connect: {0}")]
    Connection(String),

    /// Timeout error, retry might help
    #[error("Timeout")]
    Timeout,

    /// Redirect error, not retryable
    #[error("HttpRedirect: {0}")]
    HttpRedirect(String),

    /// Error building the request, unlikely to be recoverable
    #[error("Could not build request: {0}")]
    ReqBuilder(String),

    /// Maximum retries exceeded, not retryable
    #[error("Max retries {0} exceeded")]
    MaxRetriesExceeded(u8),

    /// General request error, retry might help
    #[error("Could not create request: {0}")]
    Request(String),

    /// Unknown error, unlikely to be recoverable
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Returns if this error is a problem with reaching the node rather than
    /// an answer from it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::Request(_) | Self::MaxRetriesExceeded(_)
        )
    }
}

impl From<SerdeJsonError> for ClientError {
    fn from(value: SerdeJsonError) -> Self {
        Self::Parse(format!("Could not parse {}", value))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            Self::Body(err.to_string())
        } else if err.is_status() {
            match err.status() {
                Some(code) => Self::Status(code.as_u16(), err.to_string()),
                None => Self::Other(err.to_string()),
            }
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout
        } else if err.is_request() {
            Self::Request(err.to_string())
        } else if err.is_builder() {
            Self::ReqBuilder(err.to_string())
        } else if err.is_redirect() {
            Self::HttpRedirect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}
