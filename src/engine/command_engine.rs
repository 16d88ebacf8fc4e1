//! Single-writer command execution.
//!
//! Every submission runs on the engine worker. Write commands run inside a
//! transaction: on success the change set is computed, `StateChanging` is
//! queued before the commit and `StateChanged` after it, and the command is
//! appended to the history when it changed application state. On failure the
//! transaction is rolled back and the error is returned to the caller.
//! Queued events are delivered after the command leaves its transaction and
//! before the caller sees the result.

use crate::config::EngineConfig;
use crate::engine::attribute::{AttributeChange, AttributeName, SharedValue, Value};
use crate::engine::command::{
    AttributeDelta, CommandContext, CommandKind, CommandRegistry, ExecutionContext,
    InvertibleCommand,
};
use crate::engine::events::{EngineEvent, PendingNotifications};
use crate::engine::history::{CommandHistory, HistoryEntry};
use crate::engine::memento::{DecodedMemento, Memento};
use crate::engine::state::TransactionalState;
use crate::engine::worker::{PendingResult, Worker};
use crate::error::{CommandError, EngineError, EngineResult};
use crate::utils::listeners::{panic_message, ListenerId, ListenerRegistry};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy)]
struct ExecutionMode {
    record_history: bool,
    announce: bool,
    state_events: bool,
}

impl ExecutionMode {
    const SUBMITTED: Self = Self {
        record_history: true,
        announce: true,
        state_events: true,
    };

    /// Undo/redo bodies: state events only.
    const REPLAY: Self = Self {
        record_history: false,
        announce: false,
        state_events: true,
    };

    /// Phantom bodies commit silently.
    const SILENT: Self = Self {
        record_history: false,
        announce: false,
        state_events: false,
    };
}

/// State owned by the engine worker thread.
struct EngineCore {
    state: TransactionalState,
    history: CommandHistory,
    registry: CommandRegistry,
    notifications: PendingNotifications,
    listeners: Arc<ListenerRegistry<EngineEvent>>,
    metrics: Arc<Metrics>,
    next_sequence: u64,
}

impl EngineCore {
    fn next_context(&mut self) -> CommandContext {
        self.next_sequence += 1;
        let issued_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        CommandContext {
            sequence: self.next_sequence,
            issued_at_ms,
        }
    }

    /// Runs `operation`, then delivers whatever it queued.
    fn coordinated<T>(&mut self, operation: impl FnOnce(&mut Self) -> EngineResult<T>) -> EngineResult<T> {
        let result = operation(self);
        if !self.notifications.is_empty() {
            trace!(events = self.notifications.len(), "delivering engine events");
            self.notifications.flush(&self.listeners);
        }
        result
    }

    fn submit(&mut self, kind: CommandKind) -> EngineResult<Value> {
        let context = self.next_context();
        let mode = if kind.is_phantom() {
            ExecutionMode::SILENT
        } else {
            ExecutionMode::SUBMITTED
        };
        self.coordinated(|core| core.execute_command(&kind, &context, mode))
    }

    fn execute_command(
        &mut self,
        kind: &CommandKind,
        context: &CommandContext,
        mode: ExecutionMode,
    ) -> EngineResult<Value> {
        let _timer = Timer::start("command");
        debug!(command = kind.name(), sequence = context.sequence, kind = ?kind, "executing command");

        if !kind.requires_transaction() {
            let mut ctx = ExecutionContext::new(&mut self.state, context);
            return run_body(kind, &mut ctx).map_err(|source| EngineError::Command {
                command: kind.name().to_string(),
                source,
            });
        }

        self.state.begin_transaction()?;
        let outcome = self.execute_in_transaction(kind, context, mode);
        if self.state.is_transaction_active() {
            if let Err(err) = self.state.rollback_transaction() {
                error!(error = %err, command = kind.name(), "rollback failed");
            }
        }
        outcome
    }

    fn execute_in_transaction(
        &mut self,
        kind: &CommandKind,
        context: &CommandContext,
        mode: ExecutionMode,
    ) -> EngineResult<Value> {
        let body = {
            let mut ctx = ExecutionContext::new(&mut self.state, context);
            run_body(kind, &mut ctx)
        };

        let output = match body {
            Ok(output) => output,
            Err(source) => {
                self.state.rollback_transaction()?;
                self.metrics.command_failed();
                warn!(command = kind.name(), sequence = context.sequence, error = %source, "command failed, transaction rolled back");
                if mode.announce {
                    self.notifications.push(EngineEvent::CommandFailed {
                        command: kind.name().to_string(),
                        context: context.clone(),
                        error: source.to_string(),
                    });
                }
                return Err(EngineError::Command {
                    command: kind.name().to_string(),
                    source,
                });
            }
        };

        self.state.prepare_to_commit_transaction()?;
        let changes: Arc<[AttributeChange]> = self.state.attribute_changes()?.into();
        let recorded = mode.record_history && changes.iter().any(|c| c.name().is_application());

        if mode.state_events && !changes.is_empty() {
            self.notifications.push(EngineEvent::StateChanging {
                changes: Arc::clone(&changes),
            });
        }
        self.state.commit_transaction()?;

        if recorded {
            let command: Option<Arc<dyn InvertibleCommand>> = match kind {
                CommandKind::Invertible(command) => Some(Arc::clone(command)),
                CommandKind::Write(_) => Some(Arc::new(AttributeDelta::from_changes(
                    kind.name(),
                    changes.iter(),
                ))),
                CommandKind::Phantom(_) | CommandKind::Query(_) => None,
            };
            if let Some(command) = command {
                self.history.add(command, context.clone());
            }
        }

        if mode.state_events && !changes.is_empty() {
            self.notifications
                .push(EngineEvent::StateChanged { changes });
        }
        if mode.announce {
            self.metrics.command_executed();
            self.notifications.push(EngineEvent::CommandExecuted {
                command: kind.name().to_string(),
                context: context.clone(),
                recorded,
            });
        }
        if recorded {
            self.push_history_changed();
        }
        Ok(output)
    }

    fn push_history_changed(&mut self) {
        self.notifications.push(EngineEvent::HistoryChanged {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
    }

    fn undo(&mut self) -> EngineResult<()> {
        let entry = self
            .history
            .undo_entry()
            .cloned()
            .ok_or(EngineError::UndoUnavailable)?;
        let inverse = CommandKind::Invertible(entry.command().inverse());
        self.execute_command(&inverse, entry.context(), ExecutionMode::REPLAY)?;
        self.history.undo();
        self.metrics.undo();
        debug!(command = entry.command().name(), sequence = entry.context().sequence, "undone");
        self.push_history_changed();
        Ok(())
    }

    fn redo(&mut self) -> EngineResult<()> {
        let entry = self
            .history
            .redo_entry()
            .cloned()
            .ok_or(EngineError::RedoUnavailable)?;
        let replay = CommandKind::Invertible(Arc::clone(entry.command()));
        self.execute_command(&replay, entry.context(), ExecutionMode::REPLAY)?;
        self.history.redo();
        self.metrics.redo();
        debug!(command = entry.command().name(), sequence = entry.context().sequence, "redone");
        self.push_history_changed();
        Ok(())
    }

    fn restore(&mut self, memento: &Memento) -> EngineResult<()> {
        let DecodedMemento {
            attributes,
            history,
        } = memento.decode(&self.registry)?;
        self.state.begin_transaction()?;
        let changes = match self.apply_memento(attributes) {
            Ok(changes) => changes,
            Err(err) => {
                self.state.rollback_transaction()?;
                return Err(err);
            }
        };

        if !changes.is_empty() {
            self.notifications.push(EngineEvent::StateChanging {
                changes: Arc::clone(&changes),
            });
        }
        self.state.commit_transaction()?;
        let last_sequence = history
            .iter()
            .map(|entry| entry.context().sequence)
            .max()
            .unwrap_or(0);
        self.next_sequence = self.next_sequence.max(last_sequence);
        self.history.reset(history);
        debug!(entries = self.history.len(), "memento restored");

        if !changes.is_empty() {
            self.notifications.push(EngineEvent::StateChanged { changes });
        }
        self.push_history_changed();
        Ok(())
    }

    fn apply_memento(
        &mut self,
        attributes: Vec<(AttributeName, SharedValue)>,
    ) -> EngineResult<Arc<[AttributeChange]>> {
        let existing: Vec<AttributeName> = self
            .state
            .application_attributes()
            .map(|(name, _)| name.clone())
            .collect();
        for name in &existing {
            self.state.remove_attribute(name)?;
        }
        for (name, value) in attributes {
            self.state.add_attribute(name, value)?;
        }
        self.state.prepare_to_commit_transaction()?;
        Ok(self.state.attribute_changes()?.into())
    }
}

fn run_body(kind: &CommandKind, ctx: &mut ExecutionContext<'_>) -> Result<Value, CommandError> {
    panic::catch_unwind(AssertUnwindSafe(|| kind.execute(ctx)))
        .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(&payload))))
}

struct EngineShared {
    worker: Worker<EngineCore>,
    listeners: Arc<ListenerRegistry<EngineEvent>>,
    metrics: Arc<Metrics>,
}

/// Handle to a command engine. Clones share the same worker and state.
#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<EngineShared>,
}

impl CommandEngine {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        Self::with_registry(config, CommandRegistry::new())
    }

    /// Engine whose mementos may contain the command kinds known to `registry`.
    pub fn with_registry(config: &EngineConfig, registry: CommandRegistry) -> EngineResult<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let core = EngineCore {
            state: TransactionalState::new(),
            history: CommandHistory::new(),
            registry,
            notifications: PendingNotifications::default(),
            listeners: Arc::clone(&listeners),
            metrics: Arc::clone(&metrics),
            next_sequence: 0,
        };
        let worker = Worker::spawn(&config.worker_name, core)?;
        Ok(Self {
            inner: Arc::new(EngineShared {
                worker,
                listeners,
                metrics,
            }),
        })
    }

    /// Queues `command`. Await the handle, block on it with `wait()`, or drop
    /// it for fire-and-forget.
    pub fn submit(&self, command: CommandKind) -> PendingResult<Value> {
        self.inner.worker.submit(move |core| core.submit(command))
    }

    pub async fn execute(&self, command: CommandKind) -> EngineResult<Value> {
        self.submit(command).await
    }

    /// Blocking form of [`execute`](Self::execute) for non-async callers.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`execute`](Self::execute) there. Called from the engine worker it
    /// fails with [`EngineError::WorkerReentry`].
    pub fn execute_blocking(&self, command: CommandKind) -> EngineResult<Value> {
        self.submit(command).wait()
    }

    pub fn undo(&self) -> PendingResult<()> {
        self.inner
            .worker
            .submit(|core| core.coordinated(EngineCore::undo))
    }

    pub fn redo(&self) -> PendingResult<()> {
        self.inner
            .worker
            .submit(|core| core.coordinated(EngineCore::redo))
    }

    pub fn can_undo(&self) -> PendingResult<bool> {
        self.inner.worker.submit(|core| Ok(core.history.can_undo()))
    }

    pub fn can_redo(&self) -> PendingResult<bool> {
        self.inner.worker.submit(|core| Ok(core.history.can_redo()))
    }

    /// The undoable history prefix.
    pub fn history(&self) -> PendingResult<Vec<HistoryEntry>> {
        self.inner
            .worker
            .submit(|core| Ok(core.history.entries().to_vec()))
    }

    pub fn attribute(&self, name: AttributeName) -> PendingResult<Option<SharedValue>> {
        self.inner
            .worker
            .submit(move |core| Ok(core.state.get_attribute(&name).cloned()))
    }

    pub fn application_attributes(&self) -> PendingResult<BTreeMap<AttributeName, SharedValue>> {
        self.inner.worker.submit(|core| {
            Ok(core
                .state
                .application_attributes()
                .map(|(name, value)| (name.clone(), Arc::clone(value)))
                .collect())
        })
    }

    pub fn memento(&self) -> PendingResult<Memento> {
        self.inner
            .worker
            .submit(|core| Ok(Memento::capture(&core.state, &core.history)))
    }

    /// Replaces application state and history. Nothing changes if the
    /// memento is rejected.
    pub fn restore(&self, memento: Memento) -> PendingResult<()> {
        self.inner
            .worker
            .submit(move |core| core.coordinated(|core| core.restore(&memento)))
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stops the worker after the queued commands drain. Later submissions
    /// fail with [`EngineError::Shutdown`].
    pub fn shutdown(&self) {
        self.inner.worker.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn engine() -> CommandEngine {
        CommandEngine::new(&EngineConfig::default()).unwrap()
    }

    fn name(local: &str) -> AttributeName {
        AttributeName::application(local)
    }

    fn put(local: &'static str, value: i64) -> CommandKind {
        CommandKind::write(format!("put {local}"), move |ctx| {
            let name = AttributeName::application(local);
            if ctx.contains(&name) {
                ctx.set(name, Value::Integer(value))?;
            } else {
                ctx.add(name, Value::Integer(value))?;
            }
            Ok(Value::Null)
        })
    }

    #[test]
    fn test_execute_blocking_outside_runtime() {
        let engine = engine();
        engine.execute_blocking(put("x", 3)).unwrap();
        let handle = engine.clone();
        let value = std::thread::spawn(move || {
            handle.execute_blocking(CommandKind::query("read", |ctx| {
                Ok(ctx
                    .get(&AttributeName::application("x"))
                    .map(|v| (**v).clone())
                    .unwrap_or(Value::Null))
            }))
        })
        .join()
        .unwrap()
        .unwrap();
        assert_eq!(value, Value::Integer(3));
    }

    #[tokio::test]
    async fn test_failed_command_leaves_state_untouched() {
        let engine = engine();
        engine.execute(put("x", 1)).await.unwrap();

        let failing = CommandKind::write("half-done", |ctx| {
            ctx.set(AttributeName::application("x"), Value::Integer(99))?;
            ctx.add(AttributeName::application("y"), Value::Integer(2))?;
            Err(CommandError::failed("table is locked"))
        });
        let err = engine.execute(failing).await.unwrap_err();
        assert!(matches!(err, EngineError::Command { ref command, .. } if command == "half-done"));

        let attributes = engine.application_attributes().await.unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(*attributes[&name("x")], Value::Integer(1));
        assert_eq!(engine.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_command_is_rolled_back() {
        let engine = engine();
        let panicking = CommandKind::write("explode", |ctx| {
            ctx.add(AttributeName::application("x"), Value::Integer(1))?;
            panic!("boom");
        });
        let err = engine.execute(panicking).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Command {
                source: CommandError::Panicked(_),
                ..
            }
        ));
        assert!(engine.attribute(name("x")).await.unwrap().is_none());
        // the worker survives
        engine.execute(put("x", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_undo_redo_restores_values() {
        let engine = engine();
        engine.execute(put("x", 1)).await.unwrap();
        engine.execute(put("x", 2)).await.unwrap();

        engine.undo().await.unwrap();
        assert_eq!(
            *engine.attribute(name("x")).await.unwrap().unwrap(),
            Value::Integer(1)
        );
        engine.undo().await.unwrap();
        assert!(engine.attribute(name("x")).await.unwrap().is_none());
        assert!(matches!(
            engine.undo().await,
            Err(EngineError::UndoUnavailable)
        ));

        engine.redo().await.unwrap();
        engine.redo().await.unwrap();
        assert_eq!(
            *engine.attribute(name("x")).await.unwrap().unwrap(),
            Value::Integer(2)
        );
        assert!(matches!(
            engine.redo().await,
            Err(EngineError::RedoUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_noop_write_is_not_recorded() {
        let engine = engine();
        engine.execute(put("x", 1)).await.unwrap();
        engine.execute(put("x", 1)).await.unwrap();
        assert_eq!(engine.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_phantom_and_query_do_not_record_or_announce() {
        let engine = engine();
        let events = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&events);
        engine.add_listener(move |_| *counter.lock().unwrap() += 1);

        let phantom = CommandKind::phantom("bootstrap", |ctx| {
            ctx.add(AttributeName::application("x"), Value::Integer(1))?;
            Ok(Value::Null)
        });
        engine.execute(phantom).await.unwrap();
        assert_eq!(
            *engine.attribute(name("x")).await.unwrap().unwrap(),
            Value::Integer(1)
        );

        let query = CommandKind::query("count", |ctx| {
            Ok(Value::Integer(ctx.application_attributes().count() as i64))
        });
        assert_eq!(engine.execute(query).await.unwrap(), Value::Integer(1));
        assert_eq!(*events.lock().unwrap(), 0);
        assert!(!engine.can_undo().await.unwrap());
        assert_eq!(engine.metrics().commands_executed, 0);
    }

    #[tokio::test]
    async fn test_failed_phantom_rolls_back_silently() {
        let engine = engine();
        let events = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&events);
        engine.add_listener(move |_| *counter.lock().unwrap() += 1);

        let phantom = CommandKind::phantom("bootstrap", |ctx| {
            ctx.add(AttributeName::application("x"), Value::Integer(1))?;
            ctx.add(AttributeName::application("x"), Value::Integer(2))?;
            Ok(Value::Null)
        });
        assert!(engine.execute(phantom).await.is_err());
        assert!(engine.attribute(name("x")).await.unwrap().is_none());
        assert_eq!(*events.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_cannot_mutate() {
        let engine = engine();
        let query = CommandKind::query("sneaky", |ctx| {
            ctx.add(AttributeName::application("x"), Value::Integer(1))?;
            Ok(Value::Null)
        });
        assert!(engine.execute(query).await.is_err());
        assert!(engine.attribute(name("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_order_for_recorded_write() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.add_listener(move |event| {
            let label = match event {
                EngineEvent::StateChanging { .. } => "changing",
                EngineEvent::StateChanged { .. } => "changed",
                EngineEvent::CommandExecuted { .. } => "executed",
                EngineEvent::CommandFailed { .. } => "failed",
                EngineEvent::HistoryChanged { .. } => "history",
            };
            sink.lock().unwrap().push(label);
        });

        engine.execute(put("x", 1)).await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["changing", "changed", "executed", "history"]
        );
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_fail_command() {
        let engine = engine();
        engine.add_listener(|_| panic!("bad observer"));
        engine.execute(put("x", 1)).await.unwrap();
        assert!(engine.can_undo().await.unwrap());
    }

    #[test]
    fn test_blocking_execute_from_plain_thread() {
        let engine = engine();
        engine.execute_blocking(put("x", 5)).unwrap();
        let value = engine.attribute(name("x")).wait().unwrap().unwrap();
        assert_eq!(*value, Value::Integer(5));
        engine.shutdown();
        assert!(matches!(
            engine.execute_blocking(put("x", 6)),
            Err(EngineError::Shutdown)
        ));
    }
}
