//! Transfer batch planning
//!
//! Instruction order in a batch:
//! 1. Compute budget instructions (CU limit, priority fee), if configured
//! 2. One system transfer per recipient, in recipient order

use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction, pubkey::Pubkey};
#[allow(deprecated)]
use solana_sdk::{system_instruction, system_program};

use super::errors::{PipelineError, PipelineResult};

/// Ordered instructions of one transfer batch
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,

    /// Number of leading compute budget instructions
    pub budget_instructions: usize,
}

impl InstructionPlan {
    /// The transfer instructions, without the budget prefix
    pub fn transfers(&self) -> &[Instruction] {
        &self.instructions[self.budget_instructions..]
    }
}

/// Plan one transfer of `lamports` from `payer` to each recipient.
///
/// `cu_limit` and `cu_price` of zero skip the respective budget instruction.
#[allow(deprecated)]
pub fn plan_transfer_instructions(
    payer: &Pubkey,
    recipients: &[Pubkey],
    lamports: u64,
    cu_limit: u32,
    cu_price: u64,
) -> PipelineResult<InstructionPlan> {
    if lamports == 0 {
        return Err(PipelineError::validation("transfer amount must be non-zero"));
    }
    if recipients.contains(payer) {
        return Err(PipelineError::validation("payer cannot be a transfer recipient"));
    }

    let mut instructions = Vec::with_capacity(recipients.len() + 2);

    if cu_limit > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(cu_limit));
    }
    if cu_price > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(cu_price));
    }
    let budget_instructions = instructions.len();

    instructions.extend(
        recipients
            .iter()
            .map(|recipient| system_instruction::transfer(payer, recipient, lamports)),
    );

    Ok(InstructionPlan {
        instructions,
        budget_instructions,
    })
}

/// Check that budget instructions precede every transfer (debug/test only)
#[cfg(debug_assertions)]
pub fn sanity_check_ix_order(instructions: &[Instruction]) -> PipelineResult<()> {
    let budget_program = solana_sdk::compute_budget::id();
    let mut seen_transfer = false;

    for (i, ix) in instructions.iter().enumerate() {
        if ix.program_id == budget_program {
            if seen_transfer {
                return Err(PipelineError::internal(format!(
                    "compute budget instruction at position {} follows a transfer",
                    i
                )));
            }
        } else if ix.program_id == system_program::id() {
            seen_transfer = true;
        }
    }
    Ok(())
}
