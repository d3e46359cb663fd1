//! Ledger client module
//!
//! The [`LedgerClient`] trait is the seam between the transaction pipeline and
//! the network. [`RpcLedgerClient`] talks JSON-RPC to a validator; the
//! simulated ledger in `test_utils` implements the same trait for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount, clock::Slot,
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use tracing::{debug, warn};

pub mod errors;
pub mod retry;
pub mod rpc_client;

pub use errors::{LedgerError, LedgerResult};
pub use retry::{retry_with_backoff, RetryConfig, Retryable};
pub use rpc_client::RpcLedgerClient;

/// A recent blockhash together with the last block height at which a
/// transaction referencing it can still land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentBlockReference {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Commitment level requested when asking whether a transaction is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    #[default]
    Finalized,
}

impl Commitment {
    pub fn to_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

impl std::str::FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment level '{}'", other)),
        }
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    Finalized,
    /// The block height passed the reference's ceiling before finality
    Expired,
    /// The network executed the transaction and it failed
    Rejected { reason: String },
}

impl ConfirmationResult {
    pub fn is_finalized(&self) -> bool {
        matches!(self, ConfirmationResult::Finalized)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmationResult::Finalized => "finalized",
            ConfirmationResult::Expired => "expired",
            ConfirmationResult::Rejected { .. } => "rejected",
        }
    }
}

/// Status of a signature that reached the requested commitment.
/// `Err` carries the network-provided execution failure.
pub type SignatureOutcome = Result<(), String>;

/// Primitive ledger operations used by the pipeline
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Last-valid block height of the latest blockhash; a network progress counter
    async fn get_current_height(&self) -> LedgerResult<u64>;

    /// Current block height, compared against a reference's ceiling for expiry
    async fn get_block_height(&self) -> LedgerResult<u64>;

    async fn get_current_slot(&self) -> LedgerResult<Slot>;

    async fn get_recent_block_reference(&self) -> LedgerResult<RecentBlockReference>;

    /// Submit signed bytes, returning the primary signature
    async fn broadcast(&self, transaction: &VersionedTransaction) -> LedgerResult<Signature>;

    /// `None` while the signature has not reached `commitment`
    async fn signature_status(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> LedgerResult<Option<SignatureOutcome>>;

    /// `None` when the table account does not exist or is not yet visible
    async fn resolve_address_table(
        &self,
        table: &Pubkey,
    ) -> LedgerResult<Option<AddressLookupTableAccount>>;

    async fn get_balance(&self, account: &Pubkey) -> LedgerResult<u64>;

    /// Poll until `signature` reaches `commitment` or the reference expires.
    ///
    /// The status is checked before the height on every tick. Once the height
    /// passes the ceiling, `Expired` is only reported if the signature is not
    /// known even at `processed`; a transaction that landed in its last valid
    /// blocks keeps being polled until it reaches `commitment`.
    /// Transient RPC failures are logged and the tick is retried.
    async fn await_confirmation(
        &self,
        signature: &Signature,
        reference: &RecentBlockReference,
        commitment: Commitment,
        poll_interval: Duration,
    ) -> LedgerResult<ConfirmationResult> {
        loop {
            match self.signature_status(signature, commitment).await {
                Ok(Some(Ok(()))) => return Ok(ConfirmationResult::Finalized),
                Ok(Some(Err(reason))) => return Ok(ConfirmationResult::Rejected { reason }),
                Ok(None) => match self.get_block_height().await {
                    Ok(height) if height > reference.last_valid_block_height => {
                        // Landed in the last valid blocks but not yet at `commitment`
                        match self.signature_status(signature, Commitment::Processed).await {
                            Ok(Some(_)) => {
                                debug!(
                                    signature = %signature,
                                    height,
                                    "Landed before expiry, waiting for commitment"
                                );
                            }
                            Ok(None) => {
                                debug!(
                                    signature = %signature,
                                    height,
                                    last_valid_block_height = reference.last_valid_block_height,
                                    "Block reference expired before confirmation"
                                );
                                return Ok(ConfirmationResult::Expired);
                            }
                            Err(err) if err.is_retryable() => {
                                warn!(signature = %signature, error = %err, "Transient failure reading signature status");
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    Ok(_) => {}
                    Err(err) if err.is_retryable() => {
                        warn!(signature = %signature, error = %err, "Transient failure reading block height");
                    }
                    Err(err) => return Err(err),
                },
                Err(err) if err.is_retryable() => {
                    warn!(signature = %signature, error = %err, "Transient failure reading signature status");
                }
                Err(err) => return Err(err),
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}
