//! Address-table transaction pipeline
//!
//! Leaf-first:
//! - [`watcher`]: waits for block height to pass a target
//! - [`address_table`]: create/extend instructions for the lookup table program
//! - [`compiler`]: v0 message compilation with table lookups
//! - [`submitter`]: sign, broadcast once, confirm
//! - [`orchestrator`]: sequences a full run

pub mod address_table;
pub mod compiler;
pub mod errors;
pub mod instructions;
pub mod orchestrator;
pub mod shutdown;
pub mod submitter;
pub mod watcher;

pub use address_table::{AddressTableManager, TableHandle, MAX_EXTEND_ENTRIES, MAX_TABLE_ENTRIES};
pub use compiler::{compile, CompiledMessage};
pub use errors::{PipelineError, PipelineResult};
pub use instructions::{plan_transfer_instructions, InstructionPlan};
pub use orchestrator::{Orchestrator, RunPlan, RunReport, RunState};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use submitter::{Submission, TransactionSubmitter};
pub use watcher::BlockHeightWatcher;
