//! Arbitration between a slot's current value and newly observed evidence.
//!
//! Decision table for a FILLED slot receiving a different value, first match wins:
//!
//! | existing              | new                     | result   |
//! |-----------------------|-------------------------|----------|
//! | explicit provenance   | model-derived           | dropped  |
//! | any                   | confidence >= 0.6       | conflict |
//! | priority <= new       | confidence >= 0.4       | conflict |
//! | direct alias / model  | model / direct alias    | conflict |
//! | otherwise             |                         | dropped  |
//!
//! The same value reinforces the current one. EMPTY and PARTIAL slots take the new value.

use serde::Serialize;

use super::session::SessionState;
use crate::form::{FormSlot, Provenance, SlotStatus, SlotValue, REINFORCEMENT_STEP};

/// A new value at or above this confidence always asks the user.
pub const CONFLICT_CONFIDENCE: f64 = 0.6;

/// Minimum confidence for the provenance-priority rule to ask the user.
pub const PRIORITY_CONFLICT_CONFIDENCE: f64 = 0.4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub filled: bool,
    pub conflict: bool,
    /// The same value was seen again; only its confidence moved.
    pub reinforced: bool,
}

pub fn should_conflict(existing: &SlotValue, candidate: &SlotValue) -> bool {
    if existing.value == candidate.value {
        return false;
    }
    if existing.provenance.is_explicit() && candidate.provenance.is_model_derived() {
        return false;
    }
    if candidate.confidence >= CONFLICT_CONFIDENCE {
        return true;
    }
    if candidate.provenance.priority() >= existing.provenance.priority()
        && candidate.confidence >= PRIORITY_CONFLICT_CONFIDENCE
    {
        return true;
    }
    let direct_vs_model = |left: Provenance, right: Provenance| {
        left == Provenance::DirectAlias && right.is_model_derived()
    };
    direct_vs_model(existing.provenance, candidate.provenance)
        || direct_vs_model(candidate.provenance, existing.provenance)
}

/// Applies `candidate` to `slot`. With `allow_conflict` false a would-be conflict is
/// dropped instead, so only one slot is ever under arbitration.
pub fn apply_update(slot: &mut FormSlot, candidate: SlotValue, allow_conflict: bool) -> UpdateOutcome {
    match slot.status {
        SlotStatus::Empty | SlotStatus::Partial => {
            slot.assign(candidate);
            UpdateOutcome { updated: true, filled: slot.is_filled(), ..UpdateOutcome::default() }
        }
        SlotStatus::Filled => {
            let Some(existing) = slot.value.as_mut() else {
                slot.assign(candidate);
                return UpdateOutcome {
                    updated: true,
                    filled: slot.is_filled(),
                    ..UpdateOutcome::default()
                };
            };
            if existing.value == candidate.value {
                existing.confidence = (existing.confidence + REINFORCEMENT_STEP).min(1.0);
                return UpdateOutcome { reinforced: true, ..UpdateOutcome::default() };
            }
            if allow_conflict && should_conflict(existing, &candidate) {
                slot.candidates.push(candidate);
                slot.status = SlotStatus::Conflicted;
                return UpdateOutcome { conflict: true, ..UpdateOutcome::default() };
            }
            UpdateOutcome::default()
        }
        SlotStatus::Conflicted => {
            let known = slot.current_value() == Some(candidate.value.as_str())
                || slot.candidates.iter().any(|queued| queued.value == candidate.value);
            if !known {
                slot.candidates.push(candidate);
            }
            UpdateOutcome::default()
        }
    }
}

/// The user's 1/2/3 answer to a conflict prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConflictDecision {
    KeepExisting,
    UseCandidate,
    Restate,
}

impl ConflictDecision {
    pub fn from_number(number: i64) -> Option<Self> {
        match number {
            1 => Some(Self::KeepExisting),
            2 => Some(Self::UseCandidate),
            3 => Some(Self::Restate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepExisting => "keep_existing",
            Self::UseCandidate => "use_candidate",
            Self::Restate => "restate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resolution {
    pub slot: String,
    pub decision: ConflictDecision,
    /// Value the slot holds afterwards.
    pub value: Option<String>,
    pub cleared: Vec<String>,
}

/// Settles the conflict the session is waiting on. `None` when nothing is pending.
pub fn resolve_conflict(session: &mut SessionState, decision: ConflictDecision) -> Option<Resolution> {
    let slot_name = session.awaiting_conflict.take()?;
    session.pending_conflicts.retain(|record| record.slot != slot_name);

    let candidate = session.form.get(&slot_name)?.candidates.last().cloned();
    let mut cleared = Vec::new();

    match (decision, candidate) {
        (ConflictDecision::UseCandidate, Some(candidate)) => {
            cleared = session.clear_slot(&slot_name);
            session.form.get_mut(&slot_name)?.assign(candidate);
        }
        (ConflictDecision::Restate, _) => {
            cleared = session.clear_slot(&slot_name);
        }
        (ConflictDecision::KeepExisting, _) | (ConflictDecision::UseCandidate, None) => {
            let slot = session.form.get_mut(&slot_name)?;
            slot.candidates.clear();
            slot.status = match &slot.value {
                Some(value) if value.meets_fill_threshold() => SlotStatus::Filled,
                Some(_) => SlotStatus::Partial,
                None => SlotStatus::Empty,
            };
        }
    }

    let value = session.form.value_of(&slot_name).map(str::to_string);
    Some(Resolution { slot: slot_name, decision, value, cleared })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{apply_update, resolve_conflict, should_conflict, ConflictDecision};
    use crate::dialog::session::SessionState;
    use crate::form::{FormSchema, Provenance, SlotDefinition, SlotStatus, SlotValue};

    fn value(text: &str, confidence: f64, provenance: Provenance) -> SlotValue {
        SlotValue::new(text, confidence, provenance, "test")
    }

    #[test]
    fn conflict_table_is_applied_in_order() {
        struct Case {
            name: &'static str,
            existing: SlotValue,
            candidate: SlotValue,
            conflict: bool,
        }

        let cases = [
            Case {
                name: "explicit choice is protected from the model",
                existing: value("深空灰", 0.75, Provenance::UniqueMatch),
                candidate: value("银色", 0.95, Provenance::ModelSingle),
                conflict: false,
            },
            Case {
                name: "confident model value challenges a model value",
                existing: value("深空灰", 0.8, Provenance::ModelSingle),
                candidate: value("银色", 0.6, Provenance::ModelMulti),
                conflict: true,
            },
            Case {
                name: "equal priority with moderate confidence",
                existing: value("M3", 0.9, Provenance::NumericSelection),
                candidate: value("M3 Pro", 0.45, Provenance::Semantic),
                conflict: true,
            },
            Case {
                name: "lower priority with moderate confidence is dropped",
                existing: value("M3", 0.95, Provenance::DirectAlias),
                candidate: value("M3 Pro", 0.5, Provenance::Semantic),
                conflict: false,
            },
            Case {
                name: "direct alias always challenges a model value",
                existing: value("1TB", 0.8, Provenance::ModelSingle),
                candidate: value("2TB", 0.3, Provenance::DirectAlias),
                conflict: true,
            },
            Case {
                name: "weak auto value below every threshold is dropped",
                existing: value("苹果", 1.0, Provenance::AutoSingleOption),
                candidate: value("三星", 0.3, Provenance::IntentRecommendation),
                conflict: false,
            },
        ];

        for case in cases {
            assert_eq!(should_conflict(&case.existing, &case.candidate), case.conflict, "{}", case.name);
        }
    }

    fn color_session() -> SessionState {
        let schema = FormSchema::new(vec![
            SlotDefinition::new("color"),
            SlotDefinition::new("engraving").with_dependencies(&["color"]),
        ])
        .expect("schema");
        SessionState::new("sess", Arc::new(schema))
    }

    #[test]
    fn reinforcement_raises_confidence_up_to_one() {
        let mut session = color_session();
        let slot = session.form.get_mut("color").expect("slot");
        slot.assign(value("银色", 0.95, Provenance::DirectAlias));

        let outcome = apply_update(slot, value("银色", 0.8, Provenance::ModelSingle), true);

        assert!(outcome.reinforced && !outcome.updated && !outcome.conflict);
        assert_eq!(slot.value.as_ref().map(|value| value.confidence), Some(1.0));
        assert_eq!(slot.status, SlotStatus::Filled);
    }

    #[test]
    fn conflicted_slot_queues_distinct_candidates_only() {
        let mut session = color_session();
        let slot = session.form.get_mut("color").expect("slot");
        slot.assign(value("深空灰", 0.8, Provenance::ModelSingle));

        assert!(apply_update(slot, value("银色", 0.8, Provenance::ModelSingle), true).conflict);
        let again = apply_update(slot, value("银色", 0.9, Provenance::ModelMulti), true);
        apply_update(slot, value("星光色", 0.7, Provenance::ModelSingle), true);

        assert!(!again.conflict);
        assert_eq!(slot.status, SlotStatus::Conflicted);
        assert_eq!(slot.current_value(), Some("深空灰"), "prior value survives arbitration");
        let queued: Vec<&str> = slot.candidates.iter().map(|entry| entry.value.as_str()).collect();
        assert_eq!(queued, vec!["银色", "星光色"]);
    }

    #[test]
    fn suppressed_conflict_is_dropped() {
        let mut session = color_session();
        let slot = session.form.get_mut("color").expect("slot");
        slot.assign(value("深空灰", 0.8, Provenance::ModelSingle));

        let outcome = apply_update(slot, value("银色", 0.9, Provenance::ModelSingle), false);

        assert_eq!(outcome, super::UpdateOutcome::default());
        assert_eq!(slot.status, SlotStatus::Filled);
    }

    fn conflicted_session() -> SessionState {
        let mut session = color_session();
        session
            .form
            .get_mut("color")
            .expect("slot")
            .assign(value("深空灰", 0.8, Provenance::ModelSingle));
        session
            .form
            .get_mut("engraving")
            .expect("slot")
            .assign(value("Hello", 1.0, Provenance::FreeText));
        let slot = session.form.get_mut("color").expect("slot");
        apply_update(slot, value("银色", 0.8, Provenance::ModelSingle), true);
        session.awaiting_conflict = Some("color".to_string());
        session
    }

    #[test]
    fn keep_restores_the_original_value() {
        let mut session = conflicted_session();
        let resolution =
            resolve_conflict(&mut session, ConflictDecision::KeepExisting).expect("pending");

        assert_eq!(resolution.value.as_deref(), Some("深空灰"));
        assert_eq!(session.form.status("color"), Some(SlotStatus::Filled));
        assert_eq!(session.form.status("engraving"), Some(SlotStatus::Filled));
        assert!(session.awaiting_conflict.is_none());
    }

    #[test]
    fn use_candidate_clears_dependents_then_sets_the_new_value() {
        let mut session = conflicted_session();
        let resolution =
            resolve_conflict(&mut session, ConflictDecision::UseCandidate).expect("pending");

        assert_eq!(resolution.value.as_deref(), Some("银色"));
        assert_eq!(resolution.cleared, vec!["color", "engraving"]);
        assert_eq!(session.form.status("color"), Some(SlotStatus::Filled));
        assert_eq!(session.form.status("engraving"), Some(SlotStatus::Empty));
    }

    #[test]
    fn restate_leaves_the_slot_empty() {
        let mut session = conflicted_session();
        let resolution = resolve_conflict(&mut session, ConflictDecision::Restate).expect("pending");

        assert_eq!(resolution.value, None);
        assert_eq!(session.form.status("color"), Some(SlotStatus::Empty));
        assert!(resolve_conflict(&mut session, ConflictDecision::Restate).is_none());
    }
}
