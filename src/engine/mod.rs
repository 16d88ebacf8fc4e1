//! # Command Engine
//!
//! Transactional, single-writer state engine with undo/redo history.
//!
//! ## Components
//! - **Attribute**: scoped names, values, and change records
//! - **State**: the attribute store and its begin/commit/rollback transactions
//! - **Command**: command capabilities, the invertible adapter, and the record registry
//! - **History**: the undo/redo log
//! - **Worker**: the FIFO executor every command runs on
//! - **Memento**: persisted engine state
//!
//! ## Flow
//! ```text
//! submit -> worker queue -> begin -> execute -> prepare -> diff -> commit -> history -> events
//!                                       \-> rollback -> CommandFailed
//! ```
//!
//! Only application-scoped attributes are persisted or undoable. Engine-control
//! attributes belong to the engine itself.

pub mod attribute;
pub mod command;
pub mod command_engine;
pub mod events;
pub mod history;
pub mod memento;
pub mod state;
mod worker;

pub use attribute::{AttributeChange, AttributeName, AttributeScope, SharedValue, Value};
pub use command::{
    AttributeDelta, Command, CommandContext, CommandKind, CommandRecord, CommandRegistry,
    ExecutionContext, FnCommand, InvertibleCommand,
};
pub use command_engine::CommandEngine;
pub use events::EngineEvent;
pub use history::{CommandHistory, HistoryEntry};
pub use memento::{HistoryRecord, Memento, MementoEntry, HISTORY_KEY};
pub use state::TransactionalState;
pub use worker::PendingResult;
