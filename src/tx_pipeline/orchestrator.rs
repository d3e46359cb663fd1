//! Run orchestrator
//!
//! One run provisions an address table holding every recipient, waits until
//! the table is usable, then pays all recipients in a single v0 transaction
//! that references them through the table:
//!
//! ```text
//! Idle → TableCreated → TableExtended → TableVisible → OperationsBuilt
//!      → Submitted → Finalized | Expired | Rejected
//! ```
//!
//! Steps run strictly in sequence. Any failure aborts the run with a single
//! [`PipelineError`]; nothing already on chain is rolled back. The table
//! address stays available through [`Orchestrator::table`] so a later run can
//! resume with [`RunPlan::existing_table`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use solana_sdk::{
    address_lookup_table::{instruction::derive_lookup_table_address, AddressLookupTableAccount},
    clock::Slot,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use tracing::{debug, error, info, warn, Instrument};

use super::address_table::{AddressTableManager, TableHandle, MAX_TABLE_ENTRIES};
use super::compiler::{compile, CompiledMessage};
use super::errors::{PipelineError, PipelineResult};
use super::instructions::{self, InstructionPlan};
use super::shutdown::Shutdown;
use super::submitter::{Submission, TransactionSubmitter};
use super::watcher::BlockHeightWatcher;
use crate::config::{Config, TableConfig, TransferConfig};
use crate::ledger::{
    retry_with_backoff, ConfirmationResult, LedgerClient, RecentBlockReference, RetryConfig,
    Retryable,
};
use crate::metrics::{metrics, Timer};
use crate::observability::RunContext;

/// Progress of a run; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    TableCreated,
    TableExtended,
    TableVisible,
    OperationsBuilt,
    Submitted,
    Finalized,
    Expired,
    Rejected,
}

/// What one run should do
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub recipients: Vec<Pubkey>,
    pub lamports_per_recipient: u64,
    /// Reuse a table from an earlier run: skip creation and extend it only
    /// with recipients it does not already hold
    pub existing_table: Option<Pubkey>,
}

/// Summary of a finalized run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub table_address: Pubkey,
    pub table_entries: usize,
    /// Create and extend signatures, in submission order
    pub table_signatures: Vec<Signature>,
    pub transfer_signature: Signature,
    pub inline_account_count: usize,
    pub lookup_account_count: usize,
    pub transaction_size: usize,
    pub state: RunState,
}

/// Error wrapper for the first extension, which may race the table creation
struct FirstExtendError(PipelineError);

impl Retryable for FirstExtendError {
    fn is_retryable(&self) -> bool {
        self.0.is_retryable()
            || matches!(self.0, PipelineError::Rejected { .. } | PipelineError::Expired { .. })
    }
}

impl fmt::Display for FirstExtendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub struct Orchestrator<L: ?Sized> {
    ledger: Arc<L>,
    tables: AddressTableManager,
    watcher: BlockHeightWatcher<L>,
    submitter: TransactionSubmitter<L>,
    table_config: TableConfig,
    transfer_config: TransferConfig,
    expiry_resubmits: u32,
    extend_retry: RetryConfig,
    read_retry: RetryConfig,
    state: RunState,
}

impl<L: LedgerClient + ?Sized> Orchestrator<L> {
    pub fn new(ledger: Arc<L>, config: &Config) -> Self {
        Self {
            tables: AddressTableManager::new(config.table.extend_batch_limit),
            watcher: BlockHeightWatcher::new(ledger.clone(), &config.watcher),
            submitter: TransactionSubmitter::new(
                ledger.clone(),
                config.rpc.commitment,
                &config.submitter,
            )
            .with_read_retry(config.rpc.retry.clone()),
            ledger,
            table_config: config.table.clone(),
            transfer_config: config.transfer.clone(),
            expiry_resubmits: config.submitter.expiry_resubmits,
            extend_retry: RetryConfig::conservative(),
            read_retry: config.rpc.retry.clone(),
            state: RunState::Idle,
        }
    }

    /// Override the backoff used for the first extension
    pub fn with_extend_retry(mut self, retry: RetryConfig) -> Self {
        self.extend_retry = retry;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Table owned by the current or last run, if one was created or adopted
    pub fn table(&self) -> Option<&TableHandle> {
        self.tables.table()
    }

    /// Execute one run. The orchestrator is single-use; state only moves forward.
    pub async fn run(
        &mut self,
        payer: &Keypair,
        plan: &RunPlan,
        shutdown: &Shutdown,
    ) -> PipelineResult<RunReport> {
        if self.state != RunState::Idle {
            return Err(PipelineError::internal(format!(
                "orchestrator already ran (state {:?})",
                self.state
            )));
        }

        let context = RunContext::new("transfer_batch");
        metrics().runs_total.inc();

        let span = context.span();
        let result = self.execute(payer, plan, shutdown, &context).instrument(span).await;

        if let Err(err) = &result {
            metrics()
                .runs_failed
                .with_label_values(&[err.category()])
                .inc();
            error!(
                run_id = %context.run_id,
                state = ?self.state,
                table = ?self.table().map(|t| t.address),
                error = %err,
                "Run failed"
            );
        }
        result
    }

    async fn execute(
        &mut self,
        payer: &Keypair,
        plan: &RunPlan,
        shutdown: &Shutdown,
        context: &RunContext,
    ) -> PipelineResult<RunReport> {
        let authority = payer.pubkey();
        let plan_ixs = validate_plan(&authority, plan, &self.transfer_config)?;
        let mut table_signatures = Vec::new();

        // Create, or adopt an existing table
        let created = plan.existing_table.is_none();
        let (table_address, existing) = match plan.existing_table {
            Some(address) => {
                let account = self
                    .fetch_table(&address)
                    .await?
                    .ok_or(PipelineError::NotFound(address))?;
                self.tables = self.tables.clone().with_existing(address, authority);
                info!(table = %address, entries = account.addresses.len(), "Reusing address table");
                (address, account.addresses)
            }
            None => {
                let slot = self.current_slot().await?;
                let (create_ix, address) = self.tables.create_table(authority, authority, slot);
                let submission = self.submit_instructions(payer, &[create_ix], shutdown).await?;
                info!(table = %address, signature = %submission.signature, "Address table created");
                table_signatures.push(submission.signature);
                (address, Vec::new())
            }
        };
        self.advance(RunState::TableCreated);

        // Extend with the recipients the table does not hold yet
        let present: HashSet<&Pubkey> = existing.iter().collect();
        let mut missing = Vec::new();
        for recipient in &plan.recipients {
            if !present.contains(recipient) && !missing.contains(recipient) {
                missing.push(*recipient);
            }
        }
        let batches =
            self.tables
                .extend_batches(table_address, authority, authority, existing.len(), &missing)?;
        if !created && !batches.is_empty() {
            warn!(
                table = %table_address,
                authority = %authority,
                "Extending a table this run did not create; the payer must be its authority"
            );
        }

        for (i, batch) in batches.into_iter().enumerate() {
            // Only a table created by this run can race its own creation
            let submission = if i == 0 && created {
                self.submit_first_extend(payer, batch, shutdown).await?
            } else {
                self.submit_instructions(payer, &[batch], shutdown).await?
            };
            metrics().table_extensions.inc();
            debug!(table = %table_address, batch = i, signature = %submission.signature, "Table extended");
            table_signatures.push(submission.signature);
        }
        if !missing.is_empty() {
            info!(table = %table_address, added = missing.len(), "Address table extended");
        }
        self.advance(RunState::TableExtended);

        // Wait for the last modification to fall behind the tip
        if !table_signatures.is_empty() {
            let timer = Timer::new();
            let height = self
                .watcher
                .wait_for_advance(None, self.table_config.visibility_delta_blocks, shutdown)
                .await?;
            timer.observe_duration(&metrics().visibility_wait);
            debug!(table = %table_address, height, "Address table visible");
        }
        self.advance(RunState::TableVisible);

        let table = self.resolve_table(&table_address, &plan.recipients).await?;

        #[cfg(debug_assertions)]
        instructions::sanity_check_ix_order(&plan_ixs.instructions)?;
        self.advance(RunState::OperationsBuilt);

        if shutdown.is_cancelled() {
            return Err(PipelineError::Cancelled("submitting transfers"));
        }
        let tables = [table];
        let (message, submission) = self
            .submitter
            .submit_with_refresh(
                |reference| compile(&authority, reference, &plan_ixs.instructions, &tables),
                &[payer],
                self.expiry_resubmits,
                shutdown,
            )
            .await?;
        self.advance(RunState::Submitted);

        self.finish(&message, &submission)?;

        info!(
            run_id = %context.run_id,
            table = %table_address,
            signature = %submission.signature,
            recipients = plan.recipients.len(),
            inline_accounts = message.inline_account_count(),
            lookup_accounts = message.lookup_account_count(),
            "Transfer batch finalized"
        );

        Ok(RunReport {
            run_id: context.run_id.to_string(),
            table_address,
            table_entries: tables[0].addresses.len(),
            table_signatures,
            transfer_signature: submission.signature,
            inline_account_count: message.inline_account_count(),
            lookup_account_count: message.lookup_account_count(),
            transaction_size: message.transaction_size(),
            state: self.state,
        })
    }

    /// Compile `ixs` without tables against a fresh reference and require finality
    async fn submit_instructions(
        &self,
        payer: &Keypair,
        ixs: &[Instruction],
        shutdown: &Shutdown,
    ) -> PipelineResult<Submission> {
        let authority = payer.pubkey();
        let (message, submission) = self
            .submitter
            .submit_with_refresh(
                |reference| compile(&authority, reference, ixs, &[]),
                &[payer],
                self.expiry_resubmits,
                shutdown,
            )
            .await?;
        require_finalized(&message, submission)
    }

    /// The first extend can land before the create is visible to the
    /// program; rejections and expiries are retried with backoff.
    async fn submit_first_extend(
        &self,
        payer: &Keypair,
        extend_ix: Instruction,
        shutdown: &Shutdown,
    ) -> PipelineResult<Submission> {
        let ixs = [extend_ix];
        let (this, ixs) = (self, &ixs[..]);
        let attempt = || async move {
            this.submit_instructions(payer, ixs, shutdown)
                .await
                .map_err(FirstExtendError)
        };

        let mut cancelled = shutdown.clone();
        tokio::select! {
            result = retry_with_backoff("extend_address_table", &self.extend_retry, attempt) => {
                result.map_err(|FirstExtendError(err)| err)
            }
            _ = cancelled.cancelled() => Err(PipelineError::Cancelled("extending address table")),
        }
    }

    async fn current_slot(&self) -> PipelineResult<Slot> {
        let ledger = &*self.ledger;
        Ok(retry_with_backoff("get_current_slot", &self.read_retry, move || {
            ledger.get_current_slot()
        })
        .await?)
    }

    async fn fetch_table(&self, address: &Pubkey) -> PipelineResult<Option<AddressLookupTableAccount>> {
        let ledger = &*self.ledger;
        Ok(retry_with_backoff("resolve_address_table", &self.read_retry, move || {
            ledger.resolve_address_table(address)
        })
        .await?)
    }

    async fn resolve_table(
        &self,
        address: &Pubkey,
        recipients: &[Pubkey],
    ) -> PipelineResult<AddressLookupTableAccount> {
        let table = self
            .fetch_table(address)
            .await?
            .ok_or(PipelineError::NotFound(*address))?;

        let held: HashSet<&Pubkey> = table.addresses.iter().collect();
        if let Some(absent) = recipients.iter().find(|r| !held.contains(r)) {
            return Err(PipelineError::internal(format!(
                "resolved table {} is missing recipient {}",
                address, absent
            )));
        }
        Ok(table)
    }

    fn finish(&mut self, message: &CompiledMessage, submission: &Submission) -> PipelineResult<()> {
        match &submission.result {
            ConfirmationResult::Finalized => {
                self.advance(RunState::Finalized);
                Ok(())
            }
            ConfirmationResult::Expired => {
                self.advance(RunState::Expired);
                Err(PipelineError::Expired {
                    signature: submission.signature,
                    last_valid_block_height: message.reference().last_valid_block_height,
                })
            }
            ConfirmationResult::Rejected { reason } => {
                self.advance(RunState::Rejected);
                Err(PipelineError::Rejected {
                    signature: submission.signature,
                    reason: reason.clone(),
                })
            }
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(next > self.state, "run state moved backwards: {:?} -> {:?}", self.state, next);
        debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
    }
}

/// Everything that can be checked without the network: amounts, the payer
/// not being a recipient, the table cap and that the final transaction fits
/// in one packet once every recipient is looked up.
fn validate_plan(
    payer: &Pubkey,
    plan: &RunPlan,
    transfer: &TransferConfig,
) -> PipelineResult<InstructionPlan> {
    if plan.lamports_per_recipient == 0 {
        return Err(PipelineError::validation("lamports per recipient must be non-zero"));
    }

    let mut seen = HashSet::new();
    let unique: Vec<Pubkey> = plan.recipients.iter().copied().filter(|r| seen.insert(*r)).collect();
    if unique.len() != plan.recipients.len() {
        warn!(
            recipients = plan.recipients.len(),
            unique = unique.len(),
            "Duplicate recipients will be paid once per occurrence"
        );
    }
    if unique.len() > MAX_TABLE_ENTRIES {
        return Err(PipelineError::validation(format!(
            "{} distinct recipients exceed the table capacity of {}",
            unique.len(),
            MAX_TABLE_ENTRIES
        )));
    }

    let plan_ixs = instructions::plan_transfer_instructions(
        payer,
        &plan.recipients,
        plan.lamports_per_recipient,
        transfer.compute_unit_limit,
        transfer.compute_unit_price,
    )?;

    // Size does not depend on the blockhash or the table address
    let trial_table = AddressLookupTableAccount {
        key: derive_lookup_table_address(payer, 0).0,
        addresses: unique,
    };
    let trial_reference = RecentBlockReference {
        blockhash: Hash::default(),
        last_valid_block_height: 0,
    };
    compile(payer, &trial_reference, &plan_ixs.instructions, &[trial_table])?;

    Ok(plan_ixs)
}

fn require_finalized(message: &CompiledMessage, submission: Submission) -> PipelineResult<Submission> {
    match submission.result {
        ConfirmationResult::Finalized => Ok(submission),
        ConfirmationResult::Expired => Err(PipelineError::Expired {
            signature: submission.signature,
            last_valid_block_height: message.reference().last_valid_block_height,
        }),
        ConfirmationResult::Rejected { reason } => Err(PipelineError::Rejected {
            signature: submission.signature,
            reason,
        }),
    }
}
