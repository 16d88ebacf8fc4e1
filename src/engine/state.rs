//! Attribute store with single begin/commit/rollback transactions.
//!
//! Mutations are legal only inside a writable transaction. The full mapping is
//! snapshotted on begin (values are shared, so the copy is shallow) and every
//! mutated name is remembered so the change set can be computed at commit time.

use crate::engine::attribute::{AttributeChange, AttributeName, SharedValue};
use crate::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inactive,
    Writable,
    Prepared,
}

#[derive(Debug)]
pub struct TransactionalState {
    attributes: BTreeMap<AttributeName, SharedValue>,
    backup: BTreeMap<AttributeName, SharedValue>,
    touched: BTreeSet<AttributeName>,
    phase: Phase,
}

impl Default for TransactionalState {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalState {
    pub fn new() -> Self {
        Self {
            attributes: BTreeMap::new(),
            backup: BTreeMap::new(),
            touched: BTreeSet::new(),
            phase: Phase::Inactive,
        }
    }

    pub fn is_transaction_active(&self) -> bool {
        self.phase != Phase::Inactive
    }

    pub fn begin_transaction(&mut self) -> EngineResult<()> {
        if self.is_transaction_active() {
            return Err(EngineError::TransactionAlreadyActive);
        }
        self.backup = self.attributes.clone();
        self.touched.clear();
        self.phase = Phase::Writable;
        trace!("transaction begun");
        Ok(())
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        match self.phase {
            Phase::Writable => Ok(()),
            Phase::Prepared => Err(EngineError::TransactionNotWritable),
            Phase::Inactive => Err(EngineError::TransactionNotActive),
        }
    }

    pub fn add_attribute(
        &mut self,
        name: AttributeName,
        value: impl Into<SharedValue>,
    ) -> EngineResult<()> {
        self.ensure_writable()?;
        if self.attributes.contains_key(&name) {
            return Err(EngineError::AttributePresent(name));
        }
        self.touched.insert(name.clone());
        self.attributes.insert(name, value.into());
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        name: AttributeName,
        value: impl Into<SharedValue>,
    ) -> EngineResult<()> {
        self.ensure_writable()?;
        match self.attributes.get_mut(&name) {
            Some(slot) => {
                *slot = value.into();
                self.touched.insert(name);
                Ok(())
            }
            None => Err(EngineError::AttributeAbsent(name)),
        }
    }

    /// Returns the removed value.
    pub fn remove_attribute(&mut self, name: &AttributeName) -> EngineResult<SharedValue> {
        self.ensure_writable()?;
        let removed = self
            .attributes
            .remove(name)
            .ok_or_else(|| EngineError::AttributeAbsent(name.clone()))?;
        self.touched.insert(name.clone());
        Ok(removed)
    }

    pub fn get_attribute(&self, name: &AttributeName) -> Option<&SharedValue> {
        self.attributes.get(name)
    }

    pub fn contains_attribute(&self, name: &AttributeName) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&AttributeName, &SharedValue)> {
        self.attributes.iter()
    }

    pub fn application_attributes(&self) -> impl Iterator<Item = (&AttributeName, &SharedValue)> {
        self.attributes.iter().filter(|(name, _)| name.is_application())
    }

    /// Freezes the active transaction; further mutations fail.
    pub fn prepare_to_commit_transaction(&mut self) -> EngineResult<()> {
        self.ensure_writable()?;
        self.phase = Phase::Prepared;
        Ok(())
    }

    /// Net changes of the active transaction. Touched names whose value is
    /// unchanged are omitted.
    pub fn attribute_changes(&self) -> EngineResult<Vec<AttributeChange>> {
        if !self.is_transaction_active() {
            return Err(EngineError::TransactionNotActive);
        }
        Ok(self
            .touched
            .iter()
            .filter_map(|name| {
                AttributeChange::between(name, self.backup.get(name), self.attributes.get(name))
            })
            .collect())
    }

    pub fn commit_transaction(&mut self) -> EngineResult<()> {
        if !self.is_transaction_active() {
            return Err(EngineError::TransactionNotActive);
        }
        self.backup.clear();
        self.touched.clear();
        self.phase = Phase::Inactive;
        trace!("transaction committed");
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> EngineResult<()> {
        if !self.is_transaction_active() {
            return Err(EngineError::TransactionNotActive);
        }
        self.attributes = std::mem::take(&mut self.backup);
        self.touched.clear();
        self.phase = Phase::Inactive;
        trace!("transaction rolled back");
        Ok(())
    }

    /// Sets or inserts `name`, removing it when `value` is `None`.
    pub(crate) fn put_attribute(
        &mut self,
        name: &AttributeName,
        value: Option<&SharedValue>,
    ) -> EngineResult<()> {
        match (value, self.contains_attribute(name)) {
            (Some(value), true) => self.set_attribute(name.clone(), Arc::clone(value)),
            (Some(value), false) => self.add_attribute(name.clone(), Arc::clone(value)),
            (None, true) => self.remove_attribute(name).map(|_| ()),
            (None, false) => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::attribute::Value;

    fn name(local: &str) -> AttributeName {
        AttributeName::application(local)
    }

    #[test]
    fn test_mutation_requires_transaction() {
        let mut state = TransactionalState::new();
        assert!(matches!(
            state.add_attribute(name("x"), Value::Integer(1)),
            Err(EngineError::TransactionNotActive)
        ));
        assert!(state.get_attribute(&name("x")).is_none());
    }

    #[test]
    fn test_begin_twice_fails() {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        assert!(matches!(
            state.begin_transaction(),
            Err(EngineError::TransactionAlreadyActive)
        ));
    }

    #[test]
    fn test_add_set_remove_contracts() {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        state.add_attribute(name("x"), Value::Integer(1)).unwrap();
        assert!(matches!(
            state.add_attribute(name("x"), Value::Integer(2)),
            Err(EngineError::AttributePresent(_))
        ));
        assert!(matches!(
            state.set_attribute(name("y"), Value::Integer(2)),
            Err(EngineError::AttributeAbsent(_))
        ));
        assert!(matches!(
            state.remove_attribute(&name("y")),
            Err(EngineError::AttributeAbsent(_))
        ));
        state.commit_transaction().unwrap();
        assert_eq!(
            state.get_attribute(&name("x")).map(|v| v.as_ref()),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn test_prepared_transaction_is_read_only() {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        state.add_attribute(name("x"), Value::Integer(1)).unwrap();
        state.prepare_to_commit_transaction().unwrap();
        assert!(matches!(
            state.set_attribute(name("x"), Value::Integer(2)),
            Err(EngineError::TransactionNotWritable)
        ));
        assert!(state.contains_attribute(&name("x")));
        state.commit_transaction().unwrap();
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        state.add_attribute(name("x"), Value::Integer(1)).unwrap();
        state.commit_transaction().unwrap();

        state.begin_transaction().unwrap();
        state.set_attribute(name("x"), Value::Integer(5)).unwrap();
        state.add_attribute(name("y"), Value::Bool(true)).unwrap();
        state.rollback_transaction().unwrap();

        assert!(!state.is_transaction_active());
        assert_eq!(
            state.get_attribute(&name("x")).map(|v| v.as_ref()),
            Some(&Value::Integer(1))
        );
        assert!(!state.contains_attribute(&name("y")));
    }

    #[test]
    fn test_noop_set_is_not_a_change() {
        let mut state = TransactionalState::new();
        state.begin_transaction().unwrap();
        state.add_attribute(name("x"), Value::from("a")).unwrap();
        state.commit_transaction().unwrap();

        state.begin_transaction().unwrap();
        state.set_attribute(name("x"), Value::from("a")).unwrap();
        state.add_attribute(name("y"), Value::Integer(1)).unwrap();
        state.remove_attribute(&name("y")).unwrap();
        state.prepare_to_commit_transaction().unwrap();
        assert!(state.attribute_changes().unwrap().is_empty());
        state.commit_transaction().unwrap();
    }

    #[test]
    fn test_changes_require_transaction() {
        let state = TransactionalState::new();
        assert!(matches!(
            state.attribute_changes(),
            Err(EngineError::TransactionNotActive)
        ));
    }
}
