//! Address table manager
//!
//! Builds the create and extend instructions of the address lookup table
//! program. Nothing here touches the network; the orchestrator submits the
//! instructions and sequences them.

use solana_sdk::{
    address_lookup_table::{
        instruction::{create_lookup_table, extend_lookup_table},
        state::LOOKUP_TABLE_MAX_ADDRESSES,
    },
    clock::Slot,
    instruction::Instruction,
    pubkey::Pubkey,
};
use tracing::debug;

use super::errors::{PipelineError, PipelineResult};

/// Protocol ceiling on new entries carried by one extend instruction
pub const MAX_EXTEND_ENTRIES: usize = 30;

/// Total entries a single table can hold
pub const MAX_TABLE_ENTRIES: usize = LOOKUP_TABLE_MAX_ADDRESSES;

/// Client-side view of the table this run owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub address: Pubkey,
    pub authority: Pubkey,
    /// Slot the address was derived from; zero when resuming an existing table
    pub creation_slot: Slot,
}

#[derive(Debug, Clone)]
pub struct AddressTableManager {
    extend_batch_limit: usize,
    table: Option<TableHandle>,
}

impl Default for AddressTableManager {
    fn default() -> Self {
        Self::new(MAX_EXTEND_ENTRIES)
    }
}

impl AddressTableManager {
    /// `extend_batch_limit` is clamped to `1..=MAX_EXTEND_ENTRIES`
    pub fn new(extend_batch_limit: usize) -> Self {
        Self {
            extend_batch_limit: extend_batch_limit.clamp(1, MAX_EXTEND_ENTRIES),
            table: None,
        }
    }

    /// Adopt a table created by an earlier run
    pub fn with_existing(mut self, address: Pubkey, authority: Pubkey) -> Self {
        self.table = Some(TableHandle {
            address,
            authority,
            creation_slot: 0,
        });
        self
    }

    pub fn extend_batch_limit(&self) -> usize {
        self.extend_batch_limit
    }

    pub fn table(&self) -> Option<&TableHandle> {
        self.table.as_ref()
    }

    /// Derive the table address from `(authority, recent_slot)` and build the
    /// create instruction. The derived address becomes the owned table.
    pub fn create_table(
        &mut self,
        authority: Pubkey,
        payer: Pubkey,
        recent_slot: Slot,
    ) -> (Instruction, Pubkey) {
        let (instruction, address) = create_lookup_table(authority, payer, recent_slot);
        debug!(table = %address, recent_slot, "Derived address table");

        self.table = Some(TableHandle {
            address,
            authority,
            creation_slot: recent_slot,
        });
        (instruction, address)
    }

    /// Build one extend instruction. An empty `entries` slice is a legal
    /// no-op extension.
    pub fn extend_table(
        &self,
        table: Pubkey,
        authority: Pubkey,
        payer: Pubkey,
        entries: &[Pubkey],
    ) -> PipelineResult<Instruction> {
        if entries.len() > self.extend_batch_limit {
            return Err(PipelineError::validation(format!(
                "extend batch of {} entries exceeds limit of {}",
                entries.len(),
                self.extend_batch_limit
            )));
        }

        Ok(extend_lookup_table(
            table,
            authority,
            Some(payer),
            entries.to_vec(),
        ))
    }

    /// Split `entries` into limit-sized extend instructions, in order.
    ///
    /// `existing_len` is the number of entries the table already holds; the
    /// total may not exceed [`MAX_TABLE_ENTRIES`].
    pub fn extend_batches(
        &self,
        table: Pubkey,
        authority: Pubkey,
        payer: Pubkey,
        existing_len: usize,
        entries: &[Pubkey],
    ) -> PipelineResult<Vec<Instruction>> {
        let total = existing_len + entries.len();
        if total > MAX_TABLE_ENTRIES {
            return Err(PipelineError::validation(format!(
                "table would hold {} entries, maximum is {}",
                total, MAX_TABLE_ENTRIES
            )));
        }

        entries
            .chunks(self.extend_batch_limit)
            .map(|batch| self.extend_table(table, authority, payer, batch))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::address_lookup_table::{
        self, instruction::derive_lookup_table_address, instruction::ProgramInstruction,
    };

    fn keys(n: usize) -> Vec<Pubkey> {
        (0..n).map(|_| Pubkey::new_unique()).collect()
    }

    fn new_addresses(ix: &Instruction) -> Vec<Pubkey> {
        match bincode::deserialize::<ProgramInstruction>(&ix.data).unwrap() {
            ProgramInstruction::ExtendLookupTable { new_addresses } => new_addresses,
            other => panic!("expected extend instruction, got {other:?}"),
        }
    }

    #[test]
    fn test_create_is_deterministic_and_records_table() {
        let authority = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let mut manager = AddressTableManager::default();

        let (ix, address) = manager.create_table(authority, payer, 1234);
        let (expected, _) = derive_lookup_table_address(&authority, 1234);
        assert_eq!(address, expected);
        assert_eq!(ix.program_id, address_lookup_table::program::id());

        let handle = manager.table().unwrap();
        assert_eq!(handle.address, address);
        assert_eq!(handle.creation_slot, 1234);

        let (_, again) = AddressTableManager::default().create_table(authority, payer, 1234);
        assert_eq!(again, address);
    }

    #[test]
    fn test_extend_accepts_exactly_thirty_entries() {
        let manager = AddressTableManager::default();
        let entries = keys(30);
        let ix = manager
            .extend_table(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), &entries)
            .unwrap();
        assert_eq!(new_addresses(&ix), entries);
    }

    #[test]
    fn test_extend_rejects_thirty_one_entries() {
        let manager = AddressTableManager::default();
        let err = manager
            .extend_table(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), &keys(31))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_extend_with_no_entries_is_allowed() {
        let manager = AddressTableManager::default();
        let ix = manager
            .extend_table(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), &[])
            .unwrap();
        assert!(new_addresses(&ix).is_empty());
    }

    #[test]
    fn test_configured_limit_is_clamped_to_protocol_ceiling() {
        assert_eq!(AddressTableManager::new(100).extend_batch_limit(), 30);
        assert_eq!(AddressTableManager::new(0).extend_batch_limit(), 1);

        let manager = AddressTableManager::new(10);
        assert!(manager
            .extend_table(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), &keys(11))
            .is_err());
    }

    #[test]
    fn test_batches_preserve_entry_order() {
        let manager = AddressTableManager::default();
        let entries = keys(65);
        let batches = manager
            .extend_batches(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), 0, &entries)
            .unwrap();

        assert_eq!(batches.len(), 3);
        let flattened: Vec<Pubkey> = batches.iter().flat_map(new_addresses).collect();
        assert_eq!(flattened, entries);
        assert_eq!(new_addresses(&batches[2]).len(), 5);
    }

    #[test]
    fn test_batches_respect_table_capacity() {
        let manager = AddressTableManager::default();
        let err = manager
            .extend_batches(Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique(), 250, &keys(7))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_with_existing_adopts_table() {
        let address = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let manager = AddressTableManager::default().with_existing(address, authority);
        assert_eq!(manager.table().unwrap().address, address);
        assert_eq!(manager.table().unwrap().creation_slot, 0);
    }
}
