//! Address-table transaction orchestrator
//!
//! Provisions an address lookup table, waits for it to become usable and
//! pays a batch of recipients with a single v0 transaction that references
//! them through the table.

pub mod compat;
pub mod config;
pub mod keys;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod test_utils;
pub mod tx_pipeline;

// Re-export commonly used types
pub use config::Config;
pub use ledger::{ConfirmationResult, LedgerClient, RecentBlockReference, RpcLedgerClient};
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};
pub use tx_pipeline::{Orchestrator, PipelineError, RunPlan, RunReport};
