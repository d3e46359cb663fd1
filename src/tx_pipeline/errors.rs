//! Error types for the transaction pipeline
//!
//! Every failure a run can surface maps onto exactly one variant. Local
//! validation failures never reach the network; ledger failures are split
//! into transient (safe to retry at the call site) and fatal.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

use crate::ledger::{LedgerError, Retryable};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Local input or signer validation failure, detected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// RPC timeout, connection reset or similar
    #[error("Transient network error: {0}")]
    TransientNetwork(#[source] LedgerError),

    /// Non-retryable ledger failure (bad response, undecodable account)
    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),

    /// The block reference's height ceiling passed before finality
    #[error("Transaction {signature} expired (last valid block height {last_valid_block_height})")]
    Expired {
        signature: Signature,
        last_valid_block_height: u64,
    },

    /// The network executed and rejected the transaction
    #[error("Transaction {signature} rejected: {reason}")]
    Rejected { signature: Signature, reason: String },

    /// A referenced address table could not be resolved
    #[error("Address table not found: {0}")]
    NotFound(Pubkey),

    /// The block height did not advance before the configured deadline
    #[error("Timed out after {waited_ms}ms waiting for height {target}")]
    WatchTimeout { target: u64, waited_ms: u64 },

    /// The run was cancelled by a shutdown signal
    #[error("Cancelled while {0}")]
    Cancelled(&'static str),

    /// Failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        if err.is_retryable() {
            PipelineError::TransientNetwork(err)
        } else {
            PipelineError::Ledger(err)
        }
    }
}

impl PipelineError {
    /// Check if retrying the failing call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Get the error category for metrics and exit codes
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::TransientNetwork(_) => "transient_network",
            Self::Ledger(_) => "ledger",
            Self::Expired { .. } => "expired",
            Self::Rejected { .. } => "rejected",
            Self::NotFound(_) => "not_found",
            Self::WatchTimeout { .. } => "watch_timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Signing(_) => "signing",
            Self::Configuration(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        PipelineError::is_retryable(self)
    }
}

// Convenience constructors for common error scenarios
impl PipelineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    pub fn missing_signer(signer: &Pubkey) -> Self {
        Self::Validation(format!("missing required signer {}", signer))
    }
}
