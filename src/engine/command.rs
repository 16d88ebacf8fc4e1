//! Commands, their capabilities, and the records used to persist them.
//!
//! A submission is a [`CommandKind`]: the variant decides whether the engine
//! opens a transaction, records history, and fires events. Commands that
//! supply their own inverse implement [`InvertibleCommand`]; plain writes are
//! made undoable by the engine with an [`AttributeDelta`].

use crate::engine::attribute::{AttributeChange, AttributeName, SharedValue, Value};
use crate::engine::state::TransactionalState;
use crate::error::{CommandError, EngineResult, PersistenceError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Immutable facts about one submission, recorded alongside history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Monotonic per-engine submission number
    pub sequence: u64,
    /// Wall-clock submission time in milliseconds since the UNIX epoch
    pub issued_at_ms: u64,
}

/// Engine state as seen by a running command body.
pub struct ExecutionContext<'a> {
    state: &'a mut TransactionalState,
    context: &'a CommandContext,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(state: &'a mut TransactionalState, context: &'a CommandContext) -> Self {
        Self { state, context }
    }

    pub fn context(&self) -> &CommandContext {
        self.context
    }

    pub fn get(&self, name: &AttributeName) -> Option<&SharedValue> {
        self.state.get_attribute(name)
    }

    pub fn contains(&self, name: &AttributeName) -> bool {
        self.state.contains_attribute(name)
    }

    pub fn add(&mut self, name: AttributeName, value: impl Into<SharedValue>) -> EngineResult<()> {
        self.state.add_attribute(name, value)
    }

    pub fn set(&mut self, name: AttributeName, value: impl Into<SharedValue>) -> EngineResult<()> {
        self.state.set_attribute(name, value)
    }

    pub fn remove(&mut self, name: &AttributeName) -> EngineResult<SharedValue> {
        self.state.remove_attribute(name)
    }

    pub fn application_attributes(&self) -> impl Iterator<Item = (&AttributeName, &SharedValue)> {
        self.state.application_attributes()
    }

    pub(crate) fn put(
        &mut self,
        name: &AttributeName,
        value: Option<&SharedValue>,
    ) -> EngineResult<()> {
        self.state.put_attribute(name, value)
    }
}

/// A unit of work executed on the engine worker.
pub trait Command: Send + Sync + 'static {
    /// Name used in logs and events
    fn name(&self) -> &str;

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<Value, CommandError>;
}

/// A command that can produce its own inverse and be persisted.
pub trait InvertibleCommand: Command {
    fn inverse(&self) -> Arc<dyn InvertibleCommand>;

    fn record(&self) -> CommandRecord;
}

/// How the engine treats a submission.
#[derive(Clone)]
pub enum CommandKind {
    /// Internal bookkeeping: runs in a transaction but leaves no history
    /// and fires no events.
    Phantom(Arc<dyn Command>),
    /// Read-only: no transaction, no history, no events.
    Query(Arc<dyn Command>),
    /// Mutates state; the engine synthesises the inverse from what changed.
    Write(Arc<dyn Command>),
    /// Mutates state and supplies its own inverse.
    Invertible(Arc<dyn InvertibleCommand>),
}

impl CommandKind {
    pub fn name(&self) -> &str {
        match self {
            CommandKind::Phantom(cmd) | CommandKind::Query(cmd) | CommandKind::Write(cmd) => {
                cmd.name()
            }
            CommandKind::Invertible(cmd) => cmd.name(),
        }
    }

    pub fn requires_transaction(&self) -> bool {
        matches!(
            self,
            CommandKind::Phantom(_) | CommandKind::Write(_) | CommandKind::Invertible(_)
        )
    }

    pub fn is_phantom(&self) -> bool {
        matches!(self, CommandKind::Phantom(_))
    }

    /// Write command from a closure.
    pub fn write<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        CommandKind::Write(Arc::new(FnCommand::new(name, body)))
    }

    /// Read-only command from a closure.
    pub fn query<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        CommandKind::Query(Arc::new(FnCommand::new(name, body)))
    }

    /// Phantom command from a closure.
    pub fn phantom<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        CommandKind::Phantom(Arc::new(FnCommand::new(name, body)))
    }

    pub(crate) fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<Value, CommandError> {
        match self {
            CommandKind::Phantom(cmd) | CommandKind::Query(cmd) | CommandKind::Write(cmd) => {
                cmd.execute(ctx)
            }
            CommandKind::Invertible(cmd) => cmd.execute(ctx),
        }
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            CommandKind::Phantom(_) => "Phantom",
            CommandKind::Query(_) => "Query",
            CommandKind::Write(_) => "Write",
            CommandKind::Invertible(_) => "Invertible",
        };
        f.debug_tuple(variant).field(&self.name()).finish()
    }
}

type CommandBody =
    dyn Fn(&mut ExecutionContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static;

/// Named closure command.
pub struct FnCommand {
    name: String,
    body: Box<CommandBody>,
}

impl FnCommand {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

impl Command for FnCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<Value, CommandError> {
        (self.body)(ctx)
    }
}

/// Persisted form of an invertible command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub kind: String,
    pub payload: Value,
}

/// One attribute transition inside an [`AttributeDelta`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    pub name: AttributeName,
    pub before: Option<SharedValue>,
    pub after: Option<SharedValue>,
}

/// Undoable record of the application attributes a write command changed.
///
/// Executing it applies every `after` value; its inverse applies every
/// `before` value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDelta {
    label: String,
    entries: Vec<DeltaEntry>,
}

impl AttributeDelta {
    pub const KIND: &'static str = "attribute-delta";

    pub fn from_changes<'c>(
        label: impl Into<String>,
        changes: impl IntoIterator<Item = &'c AttributeChange>,
    ) -> Self {
        let entries = changes
            .into_iter()
            .filter(|change| change.name().is_application())
            .map(|change| DeltaEntry {
                name: change.name().clone(),
                before: change.old_value().cloned(),
                after: change.new_value().cloned(),
            })
            .collect();
        Self {
            label: label.into(),
            entries,
        }
    }

    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    fn decode(payload: &Value) -> Result<Arc<dyn InvertibleCommand>, PersistenceError> {
        let invalid = |reason: &str| PersistenceError::InvalidCommandRecord {
            kind: Self::KIND.to_string(),
            reason: reason.to_string(),
        };
        let map = payload.as_map().ok_or_else(|| invalid("payload is not a map"))?;
        let label = map
            .get("label")
            .and_then(Value::as_text)
            .ok_or_else(|| invalid("missing label"))?;
        let raw_entries = map
            .get("entries")
            .and_then(Value::as_list)
            .ok_or_else(|| invalid("missing entries"))?;

        let mut entries = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let fields = raw.as_map().ok_or_else(|| invalid("entry is not a map"))?;
            let name = fields
                .get("name")
                .and_then(Value::as_text)
                .ok_or_else(|| invalid("entry without name"))?
                .parse::<AttributeName>()?;
            if !name.is_application() {
                return Err(PersistenceError::TransientAttributePresent(name.to_string()));
            }
            entries.push(DeltaEntry {
                name,
                before: fields.get("before").cloned().map(Arc::new),
                after: fields.get("after").cloned().map(Arc::new),
            });
        }
        Ok(Arc::new(Self {
            label: label.to_string(),
            entries,
        }))
    }
}

impl Command for AttributeDelta {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<Value, CommandError> {
        for entry in &self.entries {
            ctx.put(&entry.name, entry.after.as_ref())?;
        }
        Ok(Value::Null)
    }
}

impl InvertibleCommand for AttributeDelta {
    fn inverse(&self) -> Arc<dyn InvertibleCommand> {
        Arc::new(Self {
            label: self.label.clone(),
            entries: self
                .entries
                .iter()
                .map(|entry| DeltaEntry {
                    name: entry.name.clone(),
                    before: entry.after.clone(),
                    after: entry.before.clone(),
                })
                .collect(),
        })
    }

    fn record(&self) -> CommandRecord {
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mut fields = BTreeMap::new();
                fields.insert("name".to_string(), Value::Text(entry.name.to_string()));
                if let Some(before) = &entry.before {
                    fields.insert("before".to_string(), before.as_ref().clone());
                }
                if let Some(after) = &entry.after {
                    fields.insert("after".to_string(), after.as_ref().clone());
                }
                Value::Map(fields)
            })
            .collect();

        let mut payload = BTreeMap::new();
        payload.insert("label".to_string(), Value::Text(self.label.clone()));
        payload.insert("entries".to_string(), Value::List(entries));
        CommandRecord {
            kind: Self::KIND.to_string(),
            payload: Value::Map(payload),
        }
    }
}

type Decoder =
    dyn Fn(&Value) -> Result<Arc<dyn InvertibleCommand>, PersistenceError> + Send + Sync + 'static;

/// Decoders for persisted invertible commands, keyed by record kind.
#[derive(Clone)]
pub struct CommandRegistry {
    decoders: HashMap<String, Arc<Decoder>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register(AttributeDelta::KIND, AttributeDelta::decode);
        registry
    }

    pub fn register<F>(&mut self, kind: &str, decoder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn InvertibleCommand>, PersistenceError>
            + Send
            + Sync
            + 'static,
    {
        self.decoders.insert(kind.to_string(), Arc::new(decoder));
    }

    pub fn decode(
        &self,
        record: &CommandRecord,
    ) -> Result<Arc<dyn InvertibleCommand>, PersistenceError> {
        let decoder = self
            .decoders
            .get(&record.kind)
            .ok_or_else(|| PersistenceError::UnknownCommandKind(record.kind.clone()))?;
        decoder(&record.payload)
    }
}
