//! JSON-RPC ledger client
//!
//! Wraps the nonblocking `RpcClient` with a per-endpoint rate limiter and
//! classifies every `ClientError` into a [`LedgerError`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    address_lookup_table::{self, state::AddressLookupTable, AddressLookupTableAccount},
    clock::Slot,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::TransactionStatus;
use tracing::{debug, instrument, warn};

use super::{
    Commitment, LedgerClient, LedgerError, LedgerResult, RecentBlockReference, SignatureOutcome,
};
use crate::config::RpcConfig;

pub struct RpcLedgerClient {
    client: Arc<RpcClient>,
    url: String,
    timeout_ms: u64,
    commitment: Commitment,
    skip_preflight: bool,
    limiter: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for RpcLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedgerClient")
            .field("url", &self.url)
            .field("timeout_ms", &self.timeout_ms)
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}

impl RpcLedgerClient {
    pub fn new(config: &RpcConfig, skip_preflight: bool) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            timeout,
            config.commitment.to_config(),
        );
        let rps = NonZeroU32::new(config.rate_limit_rps).unwrap_or(NonZeroU32::MIN);

        Self {
            client: Arc::new(client),
            url: config.url.clone(),
            timeout_ms: timeout.as_millis() as u64,
            commitment: config.commitment,
            skip_preflight,
            limiter: RateLimiter::direct(Quota::per_second(rps)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, err: ClientError) -> LedgerError {
        LedgerError::from_client_error(err, &self.url, self.timeout_ms)
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    #[instrument(skip(self), level = "trace")]
    async fn get_current_height(&self) -> LedgerResult<u64> {
        Ok(self.get_recent_block_reference().await?.last_valid_block_height)
    }

    #[instrument(skip(self), level = "trace")]
    async fn get_block_height(&self) -> LedgerResult<u64> {
        self.limiter.until_ready().await;
        self.client
            .get_block_height_with_commitment(self.commitment.to_config())
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self), level = "trace")]
    async fn get_current_slot(&self) -> LedgerResult<Slot> {
        self.limiter.until_ready().await;
        self.client
            .get_slot_with_commitment(self.commitment.to_config())
            .await
            .map_err(|e| self.classify(e))
    }

    #[instrument(skip(self), level = "trace")]
    async fn get_recent_block_reference(&self) -> LedgerResult<RecentBlockReference> {
        self.limiter.until_ready().await;
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment.to_config())
            .await
            .map_err(|e| self.classify(e))?;

        Ok(RecentBlockReference {
            blockhash,
            last_valid_block_height,
        })
    }

    #[instrument(skip(self, transaction), fields(signature = ?transaction.signatures.first()))]
    async fn broadcast(&self, transaction: &VersionedTransaction) -> LedgerResult<Signature> {
        self.limiter.until_ready().await;
        let config = RpcSendTransactionConfig {
            skip_preflight: self.skip_preflight,
            preflight_commitment: Some(self.commitment.to_config().commitment),
            // The submitter owns retry policy; the node must not rebroadcast on its own schedule
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| self.classify(e))?;
        debug!(signature = %signature, "Transaction broadcast");
        Ok(signature)
    }

    #[instrument(skip(self), level = "trace")]
    async fn signature_status(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> LedgerResult<Option<SignatureOutcome>> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.classify(e))?;

        let status: TransactionStatus = match response.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(None),
        };

        Ok(outcome_at(&status, commitment))
    }

    #[instrument(skip(self), level = "debug")]
    async fn resolve_address_table(
        &self,
        table: &Pubkey,
    ) -> LedgerResult<Option<AddressLookupTableAccount>> {
        self.limiter.until_ready().await;
        let account = self
            .client
            .get_account_with_commitment(table, self.commitment.to_config())
            .await
            .map_err(|e| self.classify(e))?
            .value;

        let Some(account) = account else {
            return Ok(None);
        };

        if account.owner != address_lookup_table::program::id() {
            warn!(table = %table, owner = %account.owner, "Account is not owned by the address table program");
            return Err(LedgerError::InvalidAccountData {
                account: table.to_string(),
                reason: format!("unexpected owner {}", account.owner),
            });
        }

        let state = AddressLookupTable::deserialize(&account.data).map_err(|e| {
            LedgerError::InvalidAccountData {
                account: table.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Some(AddressLookupTableAccount {
            key: *table,
            addresses: state.addresses.to_vec(),
        }))
    }

    #[instrument(skip(self), level = "trace")]
    async fn get_balance(&self, account: &Pubkey) -> LedgerResult<u64> {
        self.limiter.until_ready().await;
        self.client
            .get_balance_with_commitment(account, self.commitment.to_config())
            .await
            .map(|response| response.value)
            .map_err(|e| self.classify(e))
    }
}

/// Outcome of `status` once it reached `commitment`. A failure seen below
/// `commitment` may still sit on a fork that gets dropped.
fn outcome_at(status: &TransactionStatus, commitment: Commitment) -> Option<SignatureOutcome> {
    if !status.satisfies_commitment(commitment.to_config()) {
        return None;
    }
    Some(match &status.err {
        Some(err) => Err(err.to_string()),
        None => Ok(()),
    })
}
