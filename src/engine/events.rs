//! Engine events and the deferred notification queue.

use crate::engine::attribute::AttributeChange;
use crate::engine::command::CommandContext;
use crate::utils::listeners::ListenerRegistry;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The transaction is prepared and about to commit with these changes.
    StateChanging { changes: Arc<[AttributeChange]> },
    /// The transaction committed with these changes.
    StateChanged { changes: Arc<[AttributeChange]> },
    /// A command completed and, when it changed application state, was
    /// appended to the history.
    CommandExecuted {
        command: String,
        context: CommandContext,
        recorded: bool,
    },
    /// A command body failed; its transaction was rolled back.
    CommandFailed {
        command: String,
        context: CommandContext,
        error: String,
    },
    HistoryChanged { can_undo: bool, can_redo: bool },
}

/// Events raised while a command runs, delivered once the worker has left
/// the command's critical section.
#[derive(Default)]
pub(crate) struct PendingNotifications {
    queue: VecDeque<EngineEvent>,
    flushing: bool,
}

impl PendingNotifications {
    pub(crate) fn push(&mut self, event: EngineEvent) {
        self.queue.push_back(event);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Delivers queued events in order. Events queued during delivery are
    /// delivered by the same loop rather than by a nested flush.
    pub(crate) fn flush(&mut self, listeners: &ListenerRegistry<EngineEvent>) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        while let Some(event) = self.queue.pop_front() {
            listeners.notify(&event);
        }
        self.flushing = false;
    }
}
