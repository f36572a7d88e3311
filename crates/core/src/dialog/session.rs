use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::flows::LifecycleState;
use crate::form::{Form, FormSchema, SlotValue};

/// Where the reselect sub-flow stands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ReselectStage {
    Idle,
    /// The numbered list of filled slots was shown; the next number picks one.
    AwaitingPick,
    Refilling { slot: String },
}

/// A value that could not silently replace the current one.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub slot: String,
    pub existing: Option<SlotValue>,
    pub candidate: SlotValue,
}

/// Everything one conversation remembers between turns.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub session_id: String,
    /// Incremented once per processed turn.
    pub version: u64,
    pub form: Form,
    pub lifecycle: LifecycleState,
    pub last_prompted_slot: Option<String>,
    pub reselect: ReselectStage,
    pub awaiting_conflict: Option<String>,
    pub pending_conflicts: Vec<ConflictRecord>,
    pub validation_errors: Vec<String>,
    pub confirmed_order: Option<BTreeMap<String, String>>,
    pub auto_filled: bool,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, schema: Arc<FormSchema>) -> Self {
        Self {
            session_id: session_id.into(),
            version: 0,
            form: Form::new(schema),
            lifecycle: LifecycleState::Collecting,
            last_prompted_slot: None,
            reselect: ReselectStage::Idle,
            awaiting_conflict: None,
            pending_conflicts: Vec::new(),
            validation_errors: Vec::new(),
            confirmed_order: None,
            auto_filled: false,
        }
    }

    /// Clears `slot` and its transitive dependents, dropping any conflict on them and
    /// every reported validation error.
    pub fn clear_slot(&mut self, slot: &str) -> Vec<String> {
        let cleared = self.form.clear_with_dependents(slot);
        self.pending_conflicts.retain(|record| !cleared.contains(&record.slot));
        if self.awaiting_conflict.as_ref().is_some_and(|name| cleared.contains(name)) {
            self.awaiting_conflict = None;
        }
        self.validation_errors.clear();
        cleared
    }

    /// Empties the form and every per-order pointer; the lifecycle state is left to the caller.
    pub fn reset_form(&mut self) {
        self.form.reset();
        self.last_prompted_slot = None;
        self.reselect = ReselectStage::Idle;
        self.awaiting_conflict = None;
        self.pending_conflicts.clear();
        self.validation_errors.clear();
        self.confirmed_order = None;
        self.auto_filled = false;
    }

    /// Slot name the reselect flow is refilling, if any.
    pub fn refilling_slot(&self) -> Option<&str> {
        match &self.reselect {
            ReselectStage::Refilling { slot } => Some(slot),
            ReselectStage::Idle | ReselectStage::AwaitingPick => None,
        }
    }

    /// FILLED required slots in declaration order, as numbered in the reselect menu.
    pub fn reselectable_slots(&self) -> Vec<String> {
        self.form
            .slots()
            .filter(|slot| slot.definition.required && slot.is_filled())
            .map(|slot| slot.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ConflictRecord, ReselectStage, SessionState};
    use crate::form::{FormSchema, Provenance, SlotDefinition, SlotStatus, SlotValue};

    fn session() -> SessionState {
        let schema = FormSchema::new(vec![
            SlotDefinition::new("series"),
            SlotDefinition::new("chip").with_dependencies(&["series"]),
            SlotDefinition::new("color").with_dependencies(&["series"]),
        ])
        .expect("schema");
        let mut session = SessionState::new("sess", Arc::new(schema));
        for (name, value) in [("series", "MacBook Pro"), ("chip", "M3 Pro"), ("color", "银色")] {
            session
                .form
                .get_mut(name)
                .expect("slot")
                .assign(SlotValue::new(value, 0.95, Provenance::DirectAlias, "test"));
        }
        session
    }

    #[test]
    fn clearing_drops_conflicts_and_validation_errors_for_cleared_slots() {
        let mut session = session();
        session.awaiting_conflict = Some("color".to_string());
        session.pending_conflicts.push(ConflictRecord {
            slot: "color".to_string(),
            existing: None,
            candidate: SlotValue::new("深空灰", 0.8, Provenance::ModelSingle, "model"),
        });
        session.validation_errors.push("stale".to_string());

        let cleared = session.clear_slot("series");

        assert_eq!(cleared, vec!["series", "chip", "color"]);
        assert!(session.awaiting_conflict.is_none());
        assert!(session.pending_conflicts.is_empty());
        assert!(session.validation_errors.is_empty());
        assert_eq!(session.form.status("chip"), Some(SlotStatus::Empty));
    }

    #[test]
    fn reset_forgets_the_order_but_keeps_the_session_identity() {
        let mut session = session();
        session.reselect = ReselectStage::Refilling { slot: "chip".to_string() };
        session.version = 4;

        session.reset_form();

        assert!(session.reselectable_slots().is_empty());
        assert!(session.refilling_slot().is_none());
        assert_eq!(session.version, 4);
        assert_eq!(session.session_id, "sess");
    }
}
