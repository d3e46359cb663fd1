//! Inspection helpers for v0 messages
//!
//! A v0 message carries two kinds of account references:
//! - static keys embedded in the message (signers first, then writable and
//!   readonly non-signers, program ids among them)
//! - `(table, index)` lookups resolved against address lookup tables at
//!   execution time
//!
//! These helpers give the pipeline one place to ask "who must sign" and
//! "how much did the lookup tables save".

use std::collections::HashSet;

use solana_sdk::{
    message::{v0, MessageHeader, VersionedMessage},
    pubkey::Pubkey,
};

/// Get the message header from a `VersionedMessage`.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Required signers of a v0 message.
///
/// They are always the first N static keys, where N is
/// `header.num_required_signatures`.
#[inline]
#[must_use]
pub fn required_signers(message: &v0::Message) -> &[Pubkey] {
    let num_signers = message.header.num_required_signatures as usize;
    &message.account_keys[..num_signers.min(message.account_keys.len())]
}

/// Indices of static keys invoked as programs
fn program_indices(message: &v0::Message) -> HashSet<usize> {
    message
        .instructions
        .iter()
        .map(|ix| ix.program_id_index as usize)
        .collect()
}

/// Number of static keys that are accounts rather than invoked programs.
///
/// A message paying for transfers to table-resident recipients reports 1
/// here: only the payer is carried inline as an account.
#[must_use]
pub fn inline_account_count(message: &v0::Message) -> usize {
    let programs = program_indices(message);
    (0..message.account_keys.len())
        .filter(|i| !programs.contains(i))
        .count()
}

/// Number of accounts loaded through address table lookups
#[must_use]
pub fn lookup_account_count(message: &v0::Message) -> usize {
    message
        .address_table_lookups
        .iter()
        .map(|lookup| lookup.writable_indexes.len() + lookup.readonly_indexes.len())
        .sum()
}
