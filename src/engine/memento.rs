//! Serialisable snapshot of engine state.
//!
//! A memento is a map from textual attribute names to values, plus the
//! command history under the reserved [`HISTORY_KEY`]. Only application
//! attributes are captured; any other engine-control key is rejected on load.

use crate::core::serialization::MultiFormat;
use crate::engine::attribute::{AttributeName, AttributeScope, SharedValue, Value};
use crate::engine::command::{CommandContext, CommandRecord, CommandRegistry};
use crate::engine::history::{CommandHistory, HistoryEntry};
use crate::engine::state::TransactionalState;
use crate::error::{constants, PersistenceError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reserved key holding the command history.
pub const HISTORY_KEY: &str = "engine-control:command-history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub command: CommandRecord,
    pub context: CommandContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MementoEntry {
    Attribute(Value),
    History(Vec<HistoryRecord>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Memento {
    entries: BTreeMap<String, MementoEntry>,
}

impl MultiFormat for Memento {}

/// Validated memento content ready to be applied.
pub(crate) struct DecodedMemento {
    pub(crate) attributes: Vec<(AttributeName, SharedValue)>,
    pub(crate) history: Vec<HistoryEntry>,
}

impl Memento {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn capture(state: &TransactionalState, history: &CommandHistory) -> Self {
        let mut entries: BTreeMap<String, MementoEntry> = state
            .application_attributes()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    MementoEntry::Attribute(value.as_ref().clone()),
                )
            })
            .collect();
        let records = history
            .entries()
            .iter()
            .map(|entry| HistoryRecord {
                command: entry.command().record(),
                context: entry.context().clone(),
            })
            .collect();
        entries.insert(HISTORY_KEY.to_string(), MementoEntry::History(records));
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<String, MementoEntry> {
        &self.entries
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: MementoEntry) -> Option<MementoEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<MementoEntry> {
        self.entries.remove(key)
    }

    pub fn attribute(&self, name: &AttributeName) -> Option<&Value> {
        match self.entries.get(&name.to_string()) {
            Some(MementoEntry::Attribute(value)) => Some(value),
            _ => None,
        }
    }

    pub fn history(&self) -> Option<&[HistoryRecord]> {
        match self.entries.get(HISTORY_KEY) {
            Some(MementoEntry::History(records)) => Some(records),
            _ => None,
        }
    }

    pub(crate) fn decode(
        &self,
        registry: &CommandRegistry,
    ) -> Result<DecodedMemento, PersistenceError> {
        let mut attributes = Vec::new();
        let mut records = None;

        for (key, entry) in &self.entries {
            if key == HISTORY_KEY {
                match entry {
                    MementoEntry::History(history) => records = Some(history),
                    MementoEntry::Attribute(_) => {
                        return Err(PersistenceError::Malformed(
                            constants::ERR_HISTORY_SLOT_TYPE.to_string(),
                        ))
                    }
                }
                continue;
            }

            let name: AttributeName = key.parse()?;
            if name.scope() == AttributeScope::EngineControl {
                return Err(PersistenceError::TransientAttributePresent(key.clone()));
            }
            match entry {
                MementoEntry::Attribute(value) => attributes.push((name, Arc::new(value.clone()))),
                MementoEntry::History(_) => {
                    return Err(PersistenceError::Malformed(format!(
                        "{}: '{key}'",
                        constants::ERR_ATTRIBUTE_SLOT_TYPE
                    )))
                }
            }
        }

        let records = records.ok_or(PersistenceError::MissingHistory)?;
        let history = records
            .iter()
            .map(|record| {
                registry
                    .decode(&record.command)
                    .map(|command| HistoryEntry::new(command, record.context.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DecodedMemento {
            attributes,
            history,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::serialization::SerializationFormat;

    fn memento_with(key: &str, entry: MementoEntry) -> Memento {
        let mut memento = Memento::new();
        memento.insert(HISTORY_KEY, MementoEntry::History(Vec::new()));
        memento.insert(key, entry);
        memento
    }

    #[test]
    fn test_missing_history_rejected() {
        let mut memento = Memento::new();
        memento.insert("application:x", MementoEntry::Attribute(Value::Integer(1)));
        assert!(matches!(
            memento.decode(&CommandRegistry::new()),
            Err(PersistenceError::MissingHistory)
        ));
    }

    #[test]
    fn test_transient_attribute_rejected() {
        let memento = memento_with("engine-control:cursor", MementoEntry::Attribute(Value::Null));
        assert_eq!(
            memento.decode(&CommandRegistry::new()).err(),
            Some(PersistenceError::TransientAttributePresent(
                "engine-control:cursor".to_string()
            ))
        );
    }

    #[test]
    fn test_illegal_name_rejected() {
        let memento = memento_with("board", MementoEntry::Attribute(Value::Null));
        assert_eq!(
            memento.decode(&CommandRegistry::new()).err(),
            Some(PersistenceError::IllegalAttributeName("board".to_string()))
        );
    }

    #[test]
    fn test_slot_type_mismatch_rejected() {
        let memento = memento_with("application:x", MementoEntry::History(Vec::new()));
        assert!(matches!(
            memento.decode(&CommandRegistry::new()),
            Err(PersistenceError::Malformed(_))
        ));
    }

    #[test]
    fn test_encoded_memento_decodes() {
        let memento = memento_with("application:x", MementoEntry::Attribute(Value::from("v")));
        for format in [SerializationFormat::Bincode, SerializationFormat::Json] {
            let bytes = memento.serialize_with_header(format).unwrap();
            let (restored, detected) = Memento::deserialize_with_header(&bytes).unwrap();
            assert_eq!(detected, format);
            assert_eq!(restored, memento);
            let decoded = restored.decode(&CommandRegistry::new()).unwrap();
            assert_eq!(decoded.attributes.len(), 1);
            assert!(decoded.history.is_empty());
        }
    }
}
