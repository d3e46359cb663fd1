//! Address table lifecycle against the simulated ledger

use std::sync::Arc;

use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};

use crate::config::{SubmitterConfig, WatcherConfig};
use crate::ledger::{Commitment, ConfirmationResult, LedgerClient};
use crate::test_utils::MockLedger;
use crate::tx_pipeline::{
    compile, AddressTableManager, BlockHeightWatcher, PipelineError, Shutdown, TransactionSubmitter,
};

fn keys(n: usize) -> Vec<Pubkey> {
    (0..n).map(|_| Pubkey::new_unique()).collect()
}

/// Sign and broadcast without waiting for any confirmation
async fn broadcast(ledger: &Arc<MockLedger>, payer: &Keypair, ix: Instruction) {
    let submitter = TransactionSubmitter::new(ledger.clone(), Commitment::Processed, &SubmitterConfig::default());
    let reference = ledger.get_recent_block_reference().await.unwrap();
    let message = compile(&payer.pubkey(), &reference, &[ix], &[]).unwrap();
    let tx = submitter.sign(&message, &[payer]).unwrap();
    ledger.broadcast(&tx).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_table_resolves_only_after_watcher() {
    let ledger = Arc::new(MockLedger::new());
    let payer = Keypair::new();
    ledger.fund(&payer.pubkey(), 1_000_000_000);
    let entries = keys(5);

    let mut manager = AddressTableManager::default();
    let slot = ledger.get_current_slot().await.unwrap();
    let (create_ix, table) = manager.create_table(payer.pubkey(), payer.pubkey(), slot);
    broadcast(&ledger, &payer, create_ix).await;
    let extend_ix = manager
        .extend_table(table, payer.pubkey(), payer.pubkey(), &entries)
        .unwrap();
    broadcast(&ledger, &payer, extend_ix).await;

    // landed in the current block, not yet usable
    assert_eq!(ledger.table_entries(&table).unwrap(), entries);
    assert!(ledger.resolve_address_table(&table).await.unwrap().is_none());

    let watcher = BlockHeightWatcher::new(ledger.clone(), &WatcherConfig::default());
    watcher.wait_for_advance(None, 1, &Shutdown::never()).await.unwrap();

    let resolved = ledger.resolve_address_table(&table).await.unwrap().unwrap();
    assert_eq!(resolved.key, table);
    assert_eq!(resolved.addresses, entries);
}

#[tokio::test(start_paused = true)]
async fn test_extend_with_thirty_entries_lands() {
    let ledger = Arc::new(MockLedger::new());
    let payer = Keypair::new();
    ledger.fund(&payer.pubkey(), 1_000_000_000);
    let submitter =
        TransactionSubmitter::new(ledger.clone(), Commitment::Finalized, &SubmitterConfig::default());

    let mut manager = AddressTableManager::default();
    let slot = ledger.get_current_slot().await.unwrap();
    let (create_ix, table) = manager.create_table(payer.pubkey(), payer.pubkey(), slot);
    let reference = ledger.get_recent_block_reference().await.unwrap();
    let create = compile(&payer.pubkey(), &reference, &[create_ix], &[]).unwrap();
    let created = submitter.submit(&create, &[&payer], &Shutdown::never()).await.unwrap();
    assert_eq!(created.result, ConfirmationResult::Finalized);

    let entries = keys(30);
    let extend_ix = manager
        .extend_table(table, payer.pubkey(), payer.pubkey(), &entries)
        .unwrap();
    let reference = ledger.get_recent_block_reference().await.unwrap();
    let extend = compile(&payer.pubkey(), &reference, &[extend_ix], &[]).unwrap();
    let extended = submitter.submit(&extend, &[&payer], &Shutdown::never()).await.unwrap();

    assert_eq!(extended.result, ConfirmationResult::Finalized);
    assert_eq!(ledger.table_entries(&table).unwrap(), entries);
}

#[tokio::test(start_paused = true)]
async fn test_extend_limits() {
    let manager = AddressTableManager::default();
    let (table, authority) = (Pubkey::new_unique(), Pubkey::new_unique());

    assert!(manager.extend_table(table, authority, authority, &keys(30)).is_ok());
    assert!(manager.extend_table(table, authority, authority, &[]).is_ok());
    assert!(matches!(
        manager.extend_table(table, authority, authority, &keys(31)),
        Err(PipelineError::Validation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_empty_extension_is_rejected_by_the_network() {
    let ledger = Arc::new(MockLedger::new());
    let payer = Keypair::new();
    ledger.fund(&payer.pubkey(), 1_000_000_000);
    let submitter =
        TransactionSubmitter::new(ledger.clone(), Commitment::Processed, &SubmitterConfig::default());

    let mut manager = AddressTableManager::default();
    let slot = ledger.get_current_slot().await.unwrap();
    let (create_ix, table) = manager.create_table(payer.pubkey(), payer.pubkey(), slot);
    broadcast(&ledger, &payer, create_ix).await;

    let empty = manager
        .extend_table(table, payer.pubkey(), payer.pubkey(), &[])
        .unwrap();
    let reference = ledger.get_recent_block_reference().await.unwrap();
    let message = compile(&payer.pubkey(), &reference, &[empty], &[]).unwrap();
    let submission = submitter.submit(&message, &[&payer], &Shutdown::never()).await.unwrap();

    assert!(matches!(submission.result, ConfirmationResult::Rejected { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_extend_before_create_is_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let payer = Keypair::new();
    ledger.fund(&payer.pubkey(), 1_000_000_000);
    let submitter =
        TransactionSubmitter::new(ledger.clone(), Commitment::Processed, &SubmitterConfig::default());

    let manager = AddressTableManager::default();
    let never_created = Pubkey::new_unique();
    let extend_ix = manager
        .extend_table(never_created, payer.pubkey(), payer.pubkey(), &keys(3))
        .unwrap();
    let reference = ledger.get_recent_block_reference().await.unwrap();
    let message = compile(&payer.pubkey(), &reference, &[extend_ix], &[]).unwrap();
    let submission = submitter.submit(&message, &[&payer], &Shutdown::never()).await.unwrap();

    match submission.result {
        ConfirmationResult::Rejected { reason } => assert!(reason.contains("not found")),
        other => panic!("expected Rejected, got {other:?}"),
    }
}
