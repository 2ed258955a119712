//! Gateway error set.
//!
//! The display strings here double as input to the health tracker's failure
//! classifier, so the wording is load-bearing: `ProviderExit` and `Parse`
//! carry the "provider command" marker while `Spawn` deliberately does not.

use thiserror::Error;

/// Errors produced by the gateway core.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Requested model id is not registered.
    #[error("unknown model: {0}")]
    InvalidModel(String),

    /// Configuration problem: duplicate ids, a dangling fallback reference,
    /// or a provider asked to run a model it does not expose.
    #[error("{0}")]
    Config(String),

    /// The child exceeded its configured timeout and was killed.
    #[error("provider command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The child exited non-zero.
    #[error("provider command exited with status {exit_code}: {detail}")]
    ProviderExit { exit_code: i32, detail: String },

    /// The OS refused to start the child.
    #[error("failed to start process: {0}")]
    Spawn(String),

    /// `json_contract` output carried no parsable JSON object.
    #[error("provider command produced unparsable output: {0}")]
    Parse(String),

    /// Every model in a fallback chain failed.
    #[error("{0}")]
    ChainExhausted(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
