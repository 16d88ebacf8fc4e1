//! Undo/redo log of executed invertible commands.

use crate::engine::command::{CommandContext, InvertibleCommand};
use std::fmt;
use std::sync::Arc;

/// An executed command paired with the context it ran under.
#[derive(Clone)]
pub struct HistoryEntry {
    command: Arc<dyn InvertibleCommand>,
    context: CommandContext,
}

impl HistoryEntry {
    pub fn new(command: Arc<dyn InvertibleCommand>, context: CommandContext) -> Self {
        Self { command, context }
    }

    pub fn command(&self) -> &Arc<dyn InvertibleCommand> {
        &self.command
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }
}

impl fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("command", &self.command.name())
            .field("context", &self.context)
            .finish()
    }
}

impl PartialEq for HistoryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.command.record() == other.command.record()
    }
}

/// Entries before `next_entry_index` are undoable, entries at or after it
/// are redoable.
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: Vec<HistoryEntry>,
    next_entry_index: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, discarding everything that could have been redone.
    pub fn add(&mut self, command: Arc<dyn InvertibleCommand>, context: CommandContext) {
        self.entries.truncate(self.next_entry_index);
        self.entries.push(HistoryEntry::new(command, context));
        self.next_entry_index += 1;
    }

    pub fn can_undo(&self) -> bool {
        self.next_entry_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.next_entry_index < self.entries.len()
    }

    /// Entry the next `undo` would revert.
    pub fn undo_entry(&self) -> Option<&HistoryEntry> {
        self.next_entry_index
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
    }

    /// Entry the next `redo` would replay.
    pub fn redo_entry(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.next_entry_index)
    }

    /// Moves the cursor back; the caller runs the inverse command.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.next_entry_index -= 1;
        true
    }

    /// Moves the cursor forward; the caller replays the command.
    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.next_entry_index += 1;
        true
    }

    /// The undoable prefix. Redo-pending entries are not included.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries[..self.next_entry_index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the whole history and places the cursor at its end.
    pub fn reset(&mut self, entries: Vec<HistoryEntry>) {
        self.next_entry_index = entries.len();
        self.entries = entries;
    }
}
