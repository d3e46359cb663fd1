//! Test Utilities Module
//!
//! [`MockLedger`] is an in-memory ledger implementing [`LedgerClient`]. It
//! executes system transfers and address table create/extend instructions,
//! verifies signatures, charges fees and honours the visibility rule for
//! address tables: a table resolves only once a block has passed since its
//! last modification.
//!
//! Block height advances by one on every height poll while auto-advance is
//! on, which keeps poll loops finite under paused tokio time.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    address_lookup_table::{
        self,
        instruction::{derive_lookup_table_address, ProgramInstruction},
        state::LOOKUP_TABLE_MAX_ADDRESSES,
        AddressLookupTableAccount,
    },
    clock::Slot,
    hash::{hashv, Hash},
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
#[allow(deprecated)]
use solana_sdk::{system_instruction::SystemInstruction, system_program};

use crate::ledger::{
    Commitment, LedgerClient, LedgerError, LedgerResult, RecentBlockReference, SignatureOutcome,
};

/// Blocks a blockhash stays valid for, mirroring the network constant
pub const BLOCKHASH_VALIDITY: u64 = 150;

/// Fee charged per required signature
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

const ENDPOINT: &str = "mock";
const GENESIS_HEIGHT: u64 = 100;

#[derive(Debug, Clone)]
struct MockTable {
    authority: Pubkey,
    addresses: Vec<Pubkey>,
    /// Height of the block that created or last extended the table
    last_modified: u64,
}

#[derive(Debug, Clone)]
struct Landed {
    height: u64,
    outcome: SignatureOutcome,
}

#[derive(Debug)]
struct ChainState {
    block_height: u64,
    auto_advance: bool,
    balances: HashMap<Pubkey, u64>,
    tables: HashMap<Pubkey, MockTable>,
    blockhashes: HashMap<Hash, u64>,
    statuses: HashMap<Signature, Landed>,
    broadcasts: usize,
    failing_height_polls: usize,
    failing_reads: usize,
    racing_extends: usize,
    broadcast_failures: VecDeque<BroadcastFailure>,
}

#[derive(Debug, Clone)]
enum BroadcastFailure {
    /// Reject without delivering
    Refuse(LedgerError),
    /// Deliver, then report a timeout to the caller
    LoseResponse,
}

impl ChainState {
    fn advance(&mut self) {
        if self.auto_advance {
            self.block_height += 1;
        }
    }

    fn blockhash_at(height: u64) -> Hash {
        hashv(&[b"mock-blockhash", &height.to_le_bytes()])
    }

    fn take_read_failure(&mut self) -> LedgerResult<()> {
        if self.failing_reads == 0 {
            return Ok(());
        }
        self.failing_reads -= 1;
        Err(LedgerError::Timeout {
            endpoint: ENDPOINT.to_string(),
            timeout_ms: 1_000,
        })
    }

    fn latest_reference(&mut self) -> RecentBlockReference {
        let blockhash = Self::blockhash_at(self.block_height);
        let last_valid_block_height = self.block_height + BLOCKHASH_VALIDITY;
        self.blockhashes.insert(blockhash, last_valid_block_height);
        RecentBlockReference {
            blockhash,
            last_valid_block_height,
        }
    }
}

/// Simulated chain for pipeline tests
pub struct MockLedger {
    state: Mutex<ChainState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                block_height: GENESIS_HEIGHT,
                auto_advance: true,
                balances: HashMap::new(),
                tables: HashMap::new(),
                blockhashes: HashMap::new(),
                statuses: HashMap::new(),
                broadcasts: 0,
                failing_height_polls: 0,
                failing_reads: 0,
                racing_extends: 0,
                broadcast_failures: VecDeque::new(),
            }),
        }
    }

    /// Credit `lamports` to `account`
    pub fn fund(&self, account: &Pubkey, lamports: u64) {
        *self.state.lock().balances.entry(*account).or_default() += lamports;
    }

    pub fn balance(&self, account: &Pubkey) -> u64 {
        self.state.lock().balances.get(account).copied().unwrap_or_default()
    }

    /// Same notion as [`LedgerClient::get_current_height`], without advancing
    pub fn current_height(&self) -> u64 {
        self.state.lock().block_height + BLOCKHASH_VALIDITY
    }

    pub fn block_height(&self) -> u64 {
        self.state.lock().block_height
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.state.lock().auto_advance = enabled;
    }

    pub fn advance_blocks(&self, blocks: u64) {
        self.state.lock().block_height += blocks;
    }

    /// The next `n` slot or block reference reads fail with a timeout
    pub fn fail_next_reads(&self, n: usize) {
        self.state.lock().failing_reads = n;
    }

    /// The next `n` transactions carrying an extend instruction fail as if
    /// the table program could not see the table yet
    pub fn reject_next_extends(&self, n: usize) {
        self.state.lock().racing_extends = n;
    }

    /// The next `n` calls to `get_current_height` fail with a timeout
    pub fn fail_next_height_polls(&self, n: usize) {
        self.state.lock().failing_height_polls = n;
    }

    /// The next broadcast is refused with `err` and never delivered
    pub fn fail_next_broadcast(&self, err: LedgerError) {
        self.state
            .lock()
            .broadcast_failures
            .push_back(BroadcastFailure::Refuse(err));
    }

    /// The next broadcast is delivered but the caller sees a timeout
    pub fn lose_next_broadcast_response(&self) {
        self.state
            .lock()
            .broadcast_failures
            .push_back(BroadcastFailure::LoseResponse);
    }

    /// Number of broadcast calls received, including refused ones
    pub fn broadcast_count(&self) -> usize {
        self.state.lock().broadcasts
    }

    /// Current entries of `table`, ignoring visibility
    pub fn table_entries(&self, table: &Pubkey) -> Option<Vec<Pubkey>> {
        self.state.lock().tables.get(table).map(|t| t.addresses.clone())
    }

    /// Insert a table directly, already visible
    pub fn insert_table(&self, address: Pubkey, authority: Pubkey, addresses: Vec<Pubkey>) {
        let mut state = self.state.lock();
        let last_modified = state.block_height.saturating_sub(1);
        state.tables.insert(
            address,
            MockTable {
                authority,
                addresses,
                last_modified,
            },
        );
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_current_height(&self) -> LedgerResult<u64> {
        let mut state = self.state.lock();
        if state.failing_height_polls > 0 {
            state.failing_height_polls -= 1;
            return Err(LedgerError::Timeout {
                endpoint: ENDPOINT.to_string(),
                timeout_ms: 1_000,
            });
        }
        state.advance();
        Ok(state.block_height + BLOCKHASH_VALIDITY)
    }

    async fn get_block_height(&self) -> LedgerResult<u64> {
        let mut state = self.state.lock();
        state.advance();
        Ok(state.block_height)
    }

    async fn get_current_slot(&self) -> LedgerResult<Slot> {
        let mut state = self.state.lock();
        state.take_read_failure()?;
        Ok(state.block_height)
    }

    async fn get_recent_block_reference(&self) -> LedgerResult<RecentBlockReference> {
        let mut state = self.state.lock();
        state.take_read_failure()?;
        Ok(state.latest_reference())
    }

    async fn broadcast(&self, transaction: &VersionedTransaction) -> LedgerResult<Signature> {
        let mut state = self.state.lock();
        state.broadcasts += 1;

        let lose_response = match state.broadcast_failures.pop_front() {
            Some(BroadcastFailure::Refuse(err)) => return Err(err),
            Some(BroadcastFailure::LoseResponse) => true,
            None => false,
        };

        let signature = *transaction.signatures.first().ok_or_else(|| LedgerError::RpcResponse {
            endpoint: ENDPOINT.to_string(),
            message: "transaction has no signatures".to_string(),
            code: Some(-32602),
        })?;

        let VersionedMessage::V0(message) = &transaction.message else {
            return Err(rpc_rejection("only v0 messages are supported"));
        };
        let required = message.header.num_required_signatures as usize;
        if transaction.signatures.len() != required
            || !transaction.verify_with_results().into_iter().all(|ok| ok)
        {
            return Err(rpc_rejection("signature verification failure"));
        }

        let still_valid = state
            .blockhashes
            .get(&message.recent_blockhash)
            .is_some_and(|last_valid| state.block_height <= *last_valid);
        // Expired or unknown blockhashes are dropped, as a leader would
        if still_valid && !state.statuses.contains_key(&signature) {
            execute(&mut state, message, signature)?;
        }

        if lose_response {
            return Err(LedgerError::Timeout {
                endpoint: ENDPOINT.to_string(),
                timeout_ms: 1_000,
            });
        }
        Ok(signature)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> LedgerResult<Option<SignatureOutcome>> {
        let state = self.state.lock();
        let depth = match commitment {
            Commitment::Processed => 0,
            Commitment::Confirmed => 1,
            Commitment::Finalized => 2,
        };
        Ok(state
            .statuses
            .get(signature)
            .filter(|landed| state.block_height >= landed.height + depth)
            .map(|landed| landed.outcome.clone()))
    }

    async fn resolve_address_table(
        &self,
        table: &Pubkey,
    ) -> LedgerResult<Option<AddressLookupTableAccount>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(table)
            .filter(|t| state.block_height > t.last_modified)
            .map(|t| AddressLookupTableAccount {
                key: *table,
                addresses: t.addresses.clone(),
            }))
    }

    async fn get_balance(&self, account: &Pubkey) -> LedgerResult<u64> {
        Ok(self.state.lock().balances.get(account).copied().unwrap_or_default())
    }
}

fn rpc_rejection(message: &str) -> LedgerError {
    LedgerError::RpcResponse {
        endpoint: ENDPOINT.to_string(),
        message: message.to_string(),
        code: Some(-32002),
    }
}

/// Charge the fee and run every instruction atomically, recording the outcome
fn execute(state: &mut ChainState, message: &v0::Message, signature: Signature) -> LedgerResult<()> {
    let payer = message.account_keys[0];
    let fee = LAMPORTS_PER_SIGNATURE * message.header.num_required_signatures as u64;
    let payer_balance = state.balances.get(&payer).copied().unwrap_or_default();
    if payer_balance < fee {
        return Err(LedgerError::InsufficientFunds {
            endpoint: ENDPOINT.to_string(),
        });
    }
    state.balances.insert(payer, payer_balance - fee);

    let mut balances = state.balances.clone();
    let mut tables = state.tables.clone();
    let outcome = if state.racing_extends > 0 && carries_extend(message) {
        state.racing_extends -= 1;
        Err("address table not found".to_string())
    } else {
        run_instructions(state, message, &mut balances, &mut tables)
    };
    if outcome.is_ok() {
        state.balances = balances;
        state.tables = tables;
    }

    state.statuses.insert(
        signature,
        Landed {
            height: state.block_height,
            outcome,
        },
    );
    Ok(())
}

fn run_instructions(
    state: &ChainState,
    message: &v0::Message,
    balances: &mut HashMap<Pubkey, u64>,
    tables: &mut HashMap<Pubkey, MockTable>,
) -> SignatureOutcome {
    let keys = load_keys(state, message)?;
    let num_signers = message.header.num_required_signatures as usize;
    let is_signer = |key: &Pubkey| keys.iter().take(num_signers).any(|k| k == key);

    for (i, ix) in message.instructions.iter().enumerate() {
        let account = |pos: usize| -> Result<Pubkey, String> {
            ix.accounts
                .get(pos)
                .and_then(|idx| keys.get(*idx as usize))
                .copied()
                .ok_or_else(|| format!("instruction {}: missing account {}", i, pos))
        };
        let program = keys
            .get(ix.program_id_index as usize)
            .copied()
            .ok_or_else(|| format!("instruction {}: bad program index", i))?;

        if program == system_program::id() {
            match bincode::deserialize::<SystemInstruction>(&ix.data) {
                Ok(SystemInstruction::Transfer { lamports }) => {
                    let (from, to) = (account(0)?, account(1)?);
                    if !is_signer(&from) {
                        return Err(format!("instruction {}: missing required signature", i));
                    }
                    let available = balances.get(&from).copied().unwrap_or_default();
                    if available < lamports {
                        return Err(format!("instruction {}: insufficient funds", i));
                    }
                    balances.insert(from, available - lamports);
                    *balances.entry(to).or_default() += lamports;
                }
                _ => return Err(format!("instruction {}: unsupported system instruction", i)),
            }
        } else if program == address_lookup_table::program::id() {
            let decoded = bincode::deserialize::<ProgramInstruction>(&ix.data)
                .map_err(|e| format!("instruction {}: invalid instruction data: {}", i, e))?;
            let (table, authority) = (account(0)?, account(1)?);
            if !is_signer(&authority) {
                return Err(format!("instruction {}: authority did not sign", i));
            }

            match decoded {
                ProgramInstruction::CreateLookupTable { recent_slot, .. } => {
                    let (derived, _) = derive_lookup_table_address(&authority, recent_slot);
                    if derived != table {
                        return Err(format!("instruction {}: table address mismatch", i));
                    }
                    if recent_slot > state.block_height {
                        return Err(format!("instruction {}: {} is not a recent slot", i, recent_slot));
                    }
                    if tables.contains_key(&table) {
                        return Err(format!("instruction {}: table already exists", i));
                    }
                    tables.insert(
                        table,
                        MockTable {
                            authority,
                            addresses: Vec::new(),
                            last_modified: state.block_height,
                        },
                    );
                }
                ProgramInstruction::ExtendLookupTable { new_addresses } => {
                    let entry = tables
                        .get_mut(&table)
                        .ok_or_else(|| format!("instruction {}: table {} not found", i, table))?;
                    if entry.authority != authority {
                        return Err(format!("instruction {}: incorrect authority", i));
                    }
                    if new_addresses.is_empty() {
                        return Err(format!("instruction {}: must extend with at least one address", i));
                    }
                    if entry.addresses.len() + new_addresses.len() > LOOKUP_TABLE_MAX_ADDRESSES {
                        return Err(format!("instruction {}: table is full", i));
                    }
                    entry.addresses.extend(new_addresses);
                    entry.last_modified = state.block_height;
                }
                _ => return Err(format!("instruction {}: unsupported table instruction", i)),
            }
        } else if program == solana_sdk::compute_budget::id() {
            continue;
        } else {
            return Err(format!("instruction {}: unsupported program {}", i, program));
        }
    }
    Ok(())
}

fn carries_extend(message: &v0::Message) -> bool {
    message.instructions.iter().any(|ix| {
        message.account_keys.get(ix.program_id_index as usize)
            == Some(&address_lookup_table::program::id())
            && matches!(
                bincode::deserialize::<ProgramInstruction>(&ix.data),
                Ok(ProgramInstruction::ExtendLookupTable { .. })
            )
    })
}

/// Static keys followed by writable then readonly lookups, in message order
fn load_keys(state: &ChainState, message: &v0::Message) -> Result<Vec<Pubkey>, String> {
    let mut writable = Vec::new();
    let mut readonly = Vec::new();

    for lookup in &message.address_table_lookups {
        let table = state
            .tables
            .get(&lookup.account_key)
            .filter(|t| state.block_height > t.last_modified)
            .ok_or_else(|| format!("address table {} is not available", lookup.account_key))?;

        let resolve = |idx: &u8| {
            table
                .addresses
                .get(*idx as usize)
                .copied()
                .ok_or_else(|| format!("invalid index {} into table {}", idx, lookup.account_key))
        };
        for idx in &lookup.writable_indexes {
            writable.push(resolve(idx)?);
        }
        for idx in &lookup.readonly_indexes {
            readonly.push(resolve(idx)?);
        }
    }

    let mut keys = message.account_keys.clone();
    keys.extend(writable);
    keys.extend(readonly);
    Ok(keys)
}
