//! Transaction submitter
//!
//! Drives one compiled message through sign → broadcast → confirm. The
//! signed bytes are broadcast exactly once; if the broadcast outcome is
//! unknown (transient failure) the submitter keeps tracking the locally known
//! signature instead of sending the same bytes again. The reference's
//! last-valid block height bounds every confirmation wait.

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use tracing::{debug, info, instrument, warn};

use super::compiler::CompiledMessage;
use super::errors::{PipelineError, PipelineResult};
use super::shutdown::Shutdown;
use crate::compat;
use crate::config::SubmitterConfig;
use crate::ledger::{
    retry_with_backoff, Commitment, ConfirmationResult, LedgerClient, RecentBlockReference,
    RetryConfig,
};
use crate::metrics::{metrics, Timer};

/// Terminal state of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub signature: Signature,
    pub result: ConfirmationResult,
}

pub struct TransactionSubmitter<L: ?Sized> {
    ledger: Arc<L>,
    commitment: Commitment,
    poll_interval: Duration,
    read_retry: RetryConfig,
}

impl<L: LedgerClient + ?Sized> TransactionSubmitter<L> {
    pub fn new(ledger: Arc<L>, commitment: Commitment, config: &SubmitterConfig) -> Self {
        Self {
            ledger,
            commitment,
            poll_interval: config.confirm_poll_interval(),
            read_retry: RetryConfig::default(),
        }
    }

    /// Backoff for block reference reads
    pub fn with_read_retry(mut self, retry: RetryConfig) -> Self {
        self.read_retry = retry;
        self
    }

    /// Sign `message` with the signers it requires.
    ///
    /// Signers the message does not require are ignored. A required signer
    /// missing from `signers` is a validation failure.
    pub fn sign(
        &self,
        message: &CompiledMessage,
        signers: &[&Keypair],
    ) -> PipelineResult<VersionedTransaction> {
        let ordered = message
            .required_signers()
            .iter()
            .map(|required| {
                signers
                    .iter()
                    .copied()
                    .find(|s| s.pubkey() == *required)
                    .ok_or_else(|| PipelineError::missing_signer(required))
            })
            .collect::<PipelineResult<Vec<&Keypair>>>()?;

        let transaction = VersionedTransaction::try_new(message.versioned(), ordered.as_slice())
            .map_err(|e| PipelineError::Signing(e.to_string()))?;

        debug_assert_eq!(
            transaction.signatures.len(),
            compat::get_message_header(&transaction.message).num_required_signatures as usize
        );
        Ok(transaction)
    }

    /// Sign, broadcast once and wait for a terminal confirmation result
    #[instrument(skip_all, fields(signature = tracing::field::Empty))]
    pub async fn submit(
        &self,
        message: &CompiledMessage,
        signers: &[&Keypair],
        shutdown: &Shutdown,
    ) -> PipelineResult<Submission> {
        let transaction = self.sign(message, signers)?;
        let signature = transaction.signatures[0];
        tracing::Span::current().record("signature", tracing::field::display(&signature));

        if shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled("submitting transaction"));
        }

        metrics().submissions_total.inc();
        let timer = Timer::new();

        match self.ledger.broadcast(&transaction).await {
            Ok(_) => debug!(%signature, "Transaction broadcast"),
            Err(err) if err.is_retryable() => {
                warn!(%signature, error = %err, "Broadcast outcome unknown, tracking signature");
            }
            Err(err) => {
                let result = ConfirmationResult::Rejected {
                    reason: err.to_string(),
                };
                metrics().record_outcome(&result);
                warn!(%signature, error = %err, "Broadcast rejected");
                return Ok(Submission { signature, result });
            }
        }
        drop(transaction);

        let result = self
            .confirm(&signature, message.reference(), shutdown)
            .await?;

        timer.observe_duration(&metrics().confirmation_latency);
        metrics().record_outcome(&result);
        info!(%signature, outcome = result.label(), "Submission finished");

        Ok(Submission { signature, result })
    }

    /// Submit a message built against a fresh block reference, rebuilding and
    /// resubmitting up to `resubmits` times while the result is `Expired`.
    ///
    /// Returns the message that produced the final submission.
    pub async fn submit_with_refresh<F>(
        &self,
        mut build: F,
        signers: &[&Keypair],
        resubmits: u32,
        shutdown: &Shutdown,
    ) -> PipelineResult<(CompiledMessage, Submission)>
    where
        F: FnMut(&RecentBlockReference) -> PipelineResult<CompiledMessage>,
    {
        let mut attempt = 0u32;
        loop {
            let ledger = &*self.ledger;
            let reference = retry_with_backoff("get_recent_block_reference", &self.read_retry, move || {
                ledger.get_recent_block_reference()
            })
            .await?;
            let message = build(&reference)?;
            let submission = self.submit(&message, signers, shutdown).await?;

            if submission.result == ConfirmationResult::Expired && attempt < resubmits {
                attempt += 1;
                metrics().resubmissions_total.inc();
                warn!(
                    signature = %submission.signature,
                    attempt,
                    resubmits,
                    "Block reference expired, rebuilding with a fresh one"
                );
                continue;
            }
            return Ok((message, submission));
        }
    }

    async fn confirm(
        &self,
        signature: &Signature,
        reference: &RecentBlockReference,
        shutdown: &Shutdown,
    ) -> PipelineResult<ConfirmationResult> {
        let mut shutdown = shutdown.clone();
        tokio::select! {
            result = self.ledger.await_confirmation(
                signature,
                reference,
                self.commitment,
                self.poll_interval,
            ) => Ok(result?),
            _ = shutdown.cancelled() => Err(PipelineError::Cancelled("awaiting confirmation")),
        }
    }
}
