//! Versioned (v0) message compiler
//!
//! Account keys found in a supplied address table are replaced by
//! `(table, index)` lookups; everything else stays inline. Tables are searched
//! in the order given and the first match wins. The payer, every other signer
//! and every invoked program id always stay inline.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::SIGNATURE_BYTES,
};

use super::errors::{PipelineError, PipelineResult};
use crate::compat;
use crate::ledger::RecentBlockReference;

/// A compiled v0 message bound to the block reference it was built against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    message: v0::Message,
    reference: RecentBlockReference,
}

impl CompiledMessage {
    pub fn message(&self) -> &v0::Message {
        &self.message
    }

    pub fn reference(&self) -> &RecentBlockReference {
        &self.reference
    }

    pub fn payer(&self) -> &Pubkey {
        // try_compile always places the payer first
        &self.message.account_keys[0]
    }

    /// Wire bytes of the message, the payload every signature covers
    pub fn serialize(&self) -> Vec<u8> {
        self.versioned().serialize()
    }

    pub fn versioned(&self) -> VersionedMessage {
        VersionedMessage::V0(self.message.clone())
    }

    pub fn into_versioned(self) -> VersionedMessage {
        VersionedMessage::V0(self.message)
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        compat::required_signers(&self.message)
    }

    /// Accounts (not program ids) carried inline
    pub fn inline_account_count(&self) -> usize {
        compat::inline_account_count(&self.message)
    }

    /// Accounts resolved through address tables
    pub fn lookup_account_count(&self) -> usize {
        compat::lookup_account_count(&self.message)
    }

    /// Size of the signed transaction on the wire
    pub fn transaction_size(&self) -> usize {
        let signatures = self.message.header.num_required_signatures as usize;
        short_vec_len(signatures) + signatures * SIGNATURE_BYTES + self.serialize().len()
    }
}

/// Compile `operations` into a v0 message paid by `payer`.
///
/// Duplicate accounts across operations collapse into one slot. An empty
/// `operations` slice yields a payer-only message.
pub fn compile(
    payer: &Pubkey,
    reference: &RecentBlockReference,
    operations: &[Instruction],
    tables: &[AddressLookupTableAccount],
) -> PipelineResult<CompiledMessage> {
    let message = v0::Message::try_compile(payer, operations, tables, reference.blockhash)
        .map_err(|e| PipelineError::validation(format!("message compilation failed: {}", e)))?;

    let compiled = CompiledMessage {
        message,
        reference: *reference,
    };

    let size = compiled.transaction_size();
    if size > PACKET_DATA_SIZE {
        return Err(PipelineError::validation(format!(
            "transaction of {} bytes exceeds packet limit of {} bytes",
            size, PACKET_DATA_SIZE
        )));
    }

    Ok(compiled)
}

/// Length of the compact-u16 prefix encoding `len`
fn short_vec_len(len: usize) -> usize {
    match len {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        instruction::AccountMeta,
        signature::{Keypair, Signer},
        transaction::VersionedTransaction,
    };
    #[allow(deprecated)]
    use solana_sdk::{system_instruction, system_program};

    fn reference() -> RecentBlockReference {
        RecentBlockReference {
            blockhash: Hash::new_from_array([7u8; 32]),
            last_valid_block_height: 500,
        }
    }

    fn table(addresses: Vec<Pubkey>) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses,
        }
    }

    #[allow(deprecated)]
    fn transfers(payer: &Pubkey, recipients: &[Pubkey]) -> Vec<Instruction> {
        recipients
            .iter()
            .map(|r| system_instruction::transfer(payer, r, 1_000))
            .collect()
    }

    #[test]
    fn test_compile_is_deterministic() {
        let payer = Pubkey::new_unique();
        let recipients: Vec<Pubkey> = (0..5).map(|_| Pubkey::new_unique()).collect();
        let tables = vec![table(recipients[..3].to_vec())];
        let ops = transfers(&payer, &recipients);

        let first = compile(&payer, &reference(), &ops, &tables).unwrap();
        let second = compile(&payer, &reference(), &ops, &tables).unwrap();
        assert_eq!(first.serialize(), second.serialize());
    }

    #[test]
    fn test_table_members_are_looked_up_and_others_stay_inline() {
        let payer = Pubkey::new_unique();
        let in_table = Pubkey::new_unique();
        let outside = Pubkey::new_unique();
        let lookup = table(vec![Pubkey::new_unique(), in_table]);

        let compiled = compile(
            &payer,
            &reference(),
            &transfers(&payer, &[in_table, outside]),
            &[lookup.clone()],
        )
        .unwrap();

        let message = compiled.message();
        assert!(!message.account_keys.contains(&in_table));
        assert!(message.account_keys.contains(&outside));
        assert_eq!(message.address_table_lookups.len(), 1);
        assert_eq!(message.address_table_lookups[0].account_key, lookup.key);
        assert_eq!(message.address_table_lookups[0].writable_indexes, vec![1]);
    }

    #[test]
    fn test_first_matching_table_wins() {
        let payer = Pubkey::new_unique();
        let shared = Pubkey::new_unique();
        let first = table(vec![shared]);
        let second = table(vec![Pubkey::new_unique(), shared]);

        let compiled = compile(
            &payer,
            &reference(),
            &transfers(&payer, &[shared]),
            &[first.clone(), second],
        )
        .unwrap();

        let lookups = &compiled.message().address_table_lookups;
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].account_key, first.key);
        assert_eq!(lookups[0].writable_indexes, vec![0]);
    }

    #[test]
    fn test_payer_stays_inline_even_when_in_table() {
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let lookup = table(vec![payer, recipient]);

        let compiled =
            compile(&payer, &reference(), &transfers(&payer, &[recipient]), &[lookup]).unwrap();

        assert_eq!(compiled.payer(), &payer);
        assert_eq!(compiled.required_signers(), &[payer]);
        assert_eq!(compiled.inline_account_count(), 1);
        assert_eq!(compiled.lookup_account_count(), 1);
    }

    #[test]
    fn test_program_ids_stay_inline() {
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let lookup = table(vec![system_program::id(), recipient]);

        let compiled =
            compile(&payer, &reference(), &transfers(&payer, &[recipient]), &[lookup]).unwrap();
        assert!(compiled.message().account_keys.contains(&system_program::id()));
    }

    #[test]
    fn test_empty_operations_yield_payer_only_message() {
        let payer = Pubkey::new_unique();
        let compiled = compile(&payer, &reference(), &[], &[]).unwrap();

        assert_eq!(compiled.message().account_keys, vec![payer]);
        assert!(compiled.message().instructions.is_empty());
        assert_eq!(compiled.message().header.num_required_signatures, 1);
    }

    #[test]
    fn test_duplicate_accounts_are_deduplicated() {
        let payer = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let ops = transfers(&payer, &[recipient, recipient, recipient]);

        let compiled = compile(&payer, &reference(), &ops, &[]).unwrap();
        let keys = &compiled.message().account_keys;
        assert_eq!(keys.iter().filter(|k| **k == recipient).count(), 1);
        assert_eq!(keys.len(), 3); // payer, recipient, system program
        assert_eq!(compiled.message().instructions.len(), 3);
    }

    #[test]
    fn test_transaction_size_matches_signed_bytes() {
        let payer = Keypair::new();
        let recipients: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
        let compiled = compile(
            &payer.pubkey(),
            &reference(),
            &transfers(&payer.pubkey(), &recipients),
            &[table(recipients.clone())],
        )
        .unwrap();

        let tx = VersionedTransaction::try_new(compiled.versioned(), &[&payer]).unwrap();
        assert_eq!(bincode::serialize(&tx).unwrap().len(), compiled.transaction_size());
    }

    #[test]
    fn test_oversized_transaction_is_rejected_locally() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        // 40 distinct inline accounts of 32 bytes each blow the 1232-byte packet
        let accounts = (0..40)
            .map(|_| AccountMeta::new(Pubkey::new_unique(), false))
            .collect();
        let op = Instruction::new_with_bytes(program, &[0u8; 16], accounts);

        let err = compile(&payer, &reference(), &[op], &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
