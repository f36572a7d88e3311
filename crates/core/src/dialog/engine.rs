use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conflict::{apply_update, resolve_conflict, ConflictDecision, UpdateOutcome};
use super::extraction::{Extractor, DIRECT_ALIAS_CONFIDENCE};
use super::responses::{self, source_description, Responses};
use super::sequencer::{auto_fill_single_options, filtered_options, next_slot_to_prompt, slot_prompt};
use super::session::{ConflictRecord, ReselectStage, SessionState};
use super::validation::ValidatorSet;
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::business::BusinessConfig;
use crate::errors::DomainError;
use crate::flows::{
    LifecycleAction, LifecycleContext, LifecycleEngine, LifecycleEvent, LifecycleState,
    OrderLifecycle,
};
use crate::form::{Provenance, SlotValue};
use crate::matching::{KeywordScorer, SemanticScorer};
use crate::model::ModelClient;

pub const NUMERIC_SELECTION_CONFIDENCE: f64 = 0.9;
pub const UNIQUE_MATCH_CONFIDENCE: f64 = 0.75;
pub const FREE_TEXT_CONFIDENCE: f64 = 1.0;

const AUDIT_ACTOR: &str = "dialog-engine";

/// What one processed utterance did.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TurnResult {
    pub slots_updated: Vec<String>,
    pub slots_filled: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    pub response: String,
    pub form_complete: bool,
    pub should_exit: bool,
}

impl TurnResult {
    fn record_updated(&mut self, slot: &str) {
        if !self.slots_updated.iter().any(|name| name == slot) {
            self.slots_updated.push(slot.to_string());
        }
    }

    fn record_filled(&mut self, slot: &str) {
        if !self.slots_filled.iter().any(|name| name == slot) {
            self.slots_filled.push(slot.to_string());
        }
    }
}

/// Response parts for one turn, joined by blank lines.
#[derive(Debug, Default)]
struct Reply {
    parts: Vec<String>,
    should_exit: bool,
}

impl Reply {
    fn push(&mut self, part: impl Into<String>) {
        let part = part.into();
        if !part.is_empty() {
            self.parts.push(part);
        }
    }

    fn text(&self) -> String {
        self.parts.join("\n\n")
    }
}

enum PromptedMatch {
    Accepted(SlotValue),
    Ambiguous(Vec<String>),
    NoMatch,
}

enum MenuCommand {
    Confirm,
    Reselect,
    Restart,
}

/// One conversation against one business line.
///
/// The engine owns its session; run one engine per conversation.
pub struct DialogEngine {
    config: Arc<BusinessConfig>,
    session: SessionState,
    lifecycle: LifecycleEngine<OrderLifecycle>,
    validators: ValidatorSet,
    scorer: Option<Box<dyn SemanticScorer>>,
    model: Option<Box<dyn ModelClient>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl DialogEngine {
    pub fn new(config: Arc<BusinessConfig>) -> Self {
        let session = SessionState::new(Uuid::new_v4().to_string(), config.shared_schema());
        let validators = ValidatorSet::from_config(&config);
        Self {
            config,
            session,
            lifecycle: LifecycleEngine::default(),
            validators,
            scorer: Some(Box::new(KeywordScorer::new())),
            model: None,
            audit_sink: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session.session_id = session_id.into();
        self
    }

    pub fn with_model(mut self, model: Box<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn SemanticScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn without_scorer(mut self) -> Self {
        self.scorer = None;
        self
    }

    pub fn with_validators(mut self, validators: ValidatorSet) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &BusinessConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.session
    }

    pub fn confirmed_order(&self) -> Option<&BTreeMap<String, String>> {
        self.session.confirmed_order.as_ref()
    }

    /// Welcome text plus the first question. Single-option slots are filled first.
    pub fn initial_prompt(&mut self) -> String {
        self.ensure_auto_filled();
        let mut reply = Reply::default();
        if let Some(welcome) = self.responses().configured(responses::WELCOME) {
            reply.push(welcome);
        }
        if self.session.form.is_complete() {
            self.complete_form(&mut reply);
        } else {
            self.prompt_next(&mut reply);
        }
        reply.text()
    }

    /// Routes an externally known value through the conflict resolver as if it were extracted.
    pub fn prefill(&mut self, slot: &str, value: &str) -> Result<UpdateOutcome, DomainError> {
        if !self.config.schema().contains(slot) {
            return Err(DomainError::UnknownSlot {
                business: self.config.id().to_string(),
                slot: slot.to_string(),
            });
        }
        let canonical = match filtered_options(&self.config, &self.session.form, slot) {
            Some(view) => view.canonicalize(value).map(str::to_string),
            None => Some(value.trim().to_string()).filter(|text| !text.is_empty()),
        };
        let Some(canonical) = canonical else {
            return Err(DomainError::InvariantViolation(format!(
                "`{value}` is not an acceptable value for slot `{slot}`"
            )));
        };

        let mut turn = TurnResult::default();
        let value =
            SlotValue::new(canonical, DIRECT_ALIAS_CONFIDENCE, Provenance::DirectAlias, "预填");
        Ok(self.update_slot(slot, value, &mut turn))
    }

    /// Processes one utterance end to end. Never fails; every problem becomes response text.
    pub fn process_turn(&mut self, utterance: &str) -> TurnResult {
        self.session.version += 1;
        self.ensure_auto_filled();

        let input = utterance.trim();
        let mut turn = TurnResult::default();
        let mut reply = Reply::default();

        if self.session.lifecycle == LifecycleState::AwaitingContinue {
            self.handle_awaiting_continue(input, &mut reply);
        } else if input.is_empty() {
            self.reprompt(&mut reply);
        } else if let Ok(number) = input.parse::<i64>() {
            self.handle_number(number, input, &mut turn, &mut reply);
        } else {
            self.handle_text(input, &mut turn, &mut reply);
        }

        turn.response = reply.text();
        turn.should_exit = reply.should_exit;
        turn.form_complete = self.session.form.is_complete();

        info!(
            event_name = "dialog.turn.processed",
            session_id = %self.session.session_id,
            business = %self.config.id(),
            version = self.session.version,
            lifecycle = self.session.lifecycle.as_str(),
            updated = ?turn.slots_updated,
            conflicts = turn.conflicts.len(),
            form_complete = turn.form_complete,
            "turn processed"
        );
        turn
    }

    fn responses(&self) -> Responses<'_> {
        Responses::new(&self.config)
    }

    fn ensure_auto_filled(&mut self) {
        if self.session.auto_filled {
            return;
        }
        let filled = auto_fill_single_options(&self.config, &mut self.session.form);
        self.session.auto_filled = true;
        if !filled.is_empty() {
            debug!(
                event_name = "dialog.slots.auto_filled",
                session_id = %self.session.session_id,
                slots = ?filled,
                "single-option slots filled"
            );
        }
    }

    fn handle_awaiting_continue(&mut self, input: &str, reply: &mut Reply) {
        let keywords = self.config.command_keywords();
        let resume = keywords.is_resume(input);
        let end = keywords.is_end(input);

        if resume {
            reply.push(self.responses().text(responses::RESUME));
            self.transition(LifecycleEvent::ContinueRequested, reply);
        } else if end {
            self.transition(LifecycleEvent::EndRequested, reply);
        } else {
            reply.push(self.responses().text(responses::CONTINUE_PROMPT));
        }
    }

    fn reprompt(&mut self, reply: &mut Reply) {
        if self.session.awaiting_conflict.is_some() {
            self.prompt_next(reply);
        } else if self.session.reselect == ReselectStage::AwaitingPick {
            let slots = self.session.reselectable_slots();
            reply.push(self.responses().reselect_menu(&self.session.form, &slots));
        } else if self.session.lifecycle == LifecycleState::ReadyConfirm {
            self.present_summary(reply);
        } else {
            self.prompt_next(reply);
        }
    }

    fn handle_number(&mut self, number: i64, input: &str, turn: &mut TurnResult, reply: &mut Reply) {
        if self.session.awaiting_conflict.is_some() {
            match ConflictDecision::from_number(number) {
                Some(decision) => {
                    self.settle_conflict(decision, turn);
                    self.finish_turn(turn, reply);
                }
                None => reply.push(self.responses().text(responses::CONFLICT_INVALID_CHOICE)),
            }
            return;
        }

        if self.session.reselect == ReselectStage::AwaitingPick {
            let slots = self.session.reselectable_slots();
            let picked = usize::try_from(number)
                .ok()
                .and_then(|position| position.checked_sub(1))
                .and_then(|index| slots.get(index).cloned());
            match picked {
                Some(slot) => {
                    self.transition(LifecycleEvent::ReselectPicked { slot }, reply);
                }
                None => reply.push(self.responses().text(responses::INVALID_OPTION)),
            }
            return;
        }

        if self.session.lifecycle == LifecycleState::ReadyConfirm {
            match number {
                1 => self.run_menu_command(MenuCommand::Confirm, reply),
                2 => self.run_menu_command(MenuCommand::Reselect, reply),
                3 => self.run_menu_command(MenuCommand::Restart, reply),
                _ => reply.push(self.responses().text(responses::INVALID_OPTION)),
            }
            return;
        }

        let target = self
            .session
            .last_prompted_slot
            .clone()
            .or_else(|| self.session.form.missing_required().into_iter().next());
        let Some(slot) = target else {
            self.extract_and_apply(input, turn, reply);
            return;
        };

        let value = match filtered_options(&self.config, &self.session.form, &slot) {
            Some(view) => match view.select(number) {
                Some(label) => SlotValue::new(
                    label,
                    NUMERIC_SELECTION_CONFIDENCE,
                    Provenance::NumericSelection,
                    format!("选择第{number}项"),
                ),
                None => {
                    reply.push(self.responses().text(responses::INVALID_OPTION));
                    return;
                }
            },
            None => SlotValue::new(input, FREE_TEXT_CONFIDENCE, Provenance::FreeText, "自由输入"),
        };
        self.update_slot(&slot, value, turn);
        self.finish_turn(turn, reply);
    }

    fn handle_text(&mut self, input: &str, turn: &mut TurnResult, reply: &mut Reply) {
        if self.session.awaiting_conflict.is_none() {
            if let Some(slot) = self.session.last_prompted_slot.clone() {
                match self.match_prompted_slot(&slot, input) {
                    PromptedMatch::Accepted(value) => {
                        self.update_slot(&slot, value, turn);
                        self.finish_turn(turn, reply);
                        return;
                    }
                    PromptedMatch::Ambiguous(labels) => {
                        let matches = labels.join("、");
                        reply.push(
                            self.responses()
                                .render(responses::AMBIGUOUS_MATCH, &[("matches", matches.as_str())]),
                        );
                        return;
                    }
                    PromptedMatch::NoMatch => {}
                }
            }
        }

        if self.session.lifecycle == LifecycleState::ReadyConfirm {
            let keywords = self.config.command_keywords();
            let command = if keywords.is_confirm(input) {
                Some(MenuCommand::Confirm)
            } else if keywords.is_reselect(input) {
                Some(MenuCommand::Reselect)
            } else if keywords.is_restart(input) {
                Some(MenuCommand::Restart)
            } else {
                None
            };
            if let Some(command) = command {
                self.run_menu_command(command, reply);
                return;
            }
        }

        self.extract_and_apply(input, turn, reply);
    }

    fn match_prompted_slot(&self, slot: &str, input: &str) -> PromptedMatch {
        let Some(definition) = self.config.schema().get(slot) else {
            return PromptedMatch::NoMatch;
        };
        if definition.is_free_text() {
            return PromptedMatch::Accepted(SlotValue::new(
                input,
                FREE_TEXT_CONFIDENCE,
                Provenance::FreeText,
                "自由输入",
            ));
        }
        let Some(view) = filtered_options(&self.config, &self.session.form, slot) else {
            return PromptedMatch::NoMatch;
        };
        match view.collect_matches(input).as_slice() {
            [] => PromptedMatch::NoMatch,
            [label] => PromptedMatch::Accepted(SlotValue::new(
                *label,
                UNIQUE_MATCH_CONFIDENCE,
                Provenance::UniqueMatch,
                "唯一匹配",
            )),
            labels => PromptedMatch::Ambiguous(labels.iter().map(|label| label.to_string()).collect()),
        }
    }

    fn run_menu_command(&mut self, command: MenuCommand, reply: &mut Reply) {
        match command {
            MenuCommand::Confirm => self.confirm(reply),
            MenuCommand::Reselect => {
                self.transition(LifecycleEvent::ReselectRequested, reply);
            }
            MenuCommand::Restart => {
                reply.push(self.responses().text(responses::RESTART));
                self.transition(LifecycleEvent::RestartRequested, reply);
            }
        }
    }

    fn extract_and_apply(&mut self, input: &str, turn: &mut TurnResult, reply: &mut Reply) {
        let extraction = Extractor::new(&self.config, &self.session.form)
            .with_scorer(self.scorer.as_deref())
            .with_model(self.model.as_deref())
            .extract(input);

        if let Some(error) = &extraction.model_failure {
            self.audit(
                "extraction.model_failed",
                AuditCategory::Model,
                AuditOutcome::Failed,
                &[("error", error.to_string())],
            );
        }

        for (slot, value) in extraction.values {
            if self.update_slot(&slot, value, turn).conflict {
                break;
            }
        }
        self.finish_turn(turn, reply);
    }

    fn update_slot(&mut self, slot: &str, value: SlotValue, turn: &mut TurnResult) -> UpdateOutcome {
        let allow_conflict = self.session.awaiting_conflict.is_none();
        let Some(form_slot) = self.session.form.get_mut(slot) else {
            return UpdateOutcome::default();
        };
        let existing = form_slot.value.clone();
        let candidate = value.clone();
        let outcome = apply_update(form_slot, value, allow_conflict);

        if outcome.updated {
            turn.record_updated(slot);
            self.session.validation_errors.clear();
        }
        if outcome.filled {
            turn.record_filled(slot);
        }
        if outcome.conflict {
            let record = ConflictRecord { slot: slot.to_string(), existing, candidate };
            info!(
                event_name = "dialog.conflict.opened",
                session_id = %self.session.session_id,
                slot = %slot,
                existing = ?record.existing.as_ref().map(|value| value.value.as_str()),
                candidate = %record.candidate.value,
                provenance = record.candidate.provenance.as_str(),
                "slot awaiting user arbitration"
            );
            self.audit(
                "dialog.conflict_opened",
                AuditCategory::Conflict,
                AuditOutcome::Success,
                &[("slot", slot.to_string()), ("candidate", record.candidate.value.clone())],
            );
            self.session.awaiting_conflict = Some(slot.to_string());
            self.session.pending_conflicts.push(record.clone());
            turn.conflicts.push(record);
        }
        outcome
    }

    fn settle_conflict(&mut self, decision: ConflictDecision, turn: &mut TurnResult) {
        let Some(resolution) = resolve_conflict(&mut self.session, decision) else { return };
        if decision == ConflictDecision::UseCandidate && resolution.value.is_some() {
            turn.record_updated(&resolution.slot);
            if self.session.form.is_filled(&resolution.slot) {
                turn.record_filled(&resolution.slot);
            }
        }
        info!(
            event_name = "dialog.conflict.resolved",
            session_id = %self.session.session_id,
            slot = %resolution.slot,
            decision = decision.as_str(),
            cleared = ?resolution.cleared,
            "conflict resolved"
        );
        self.audit(
            "dialog.conflict_resolved",
            AuditCategory::Conflict,
            AuditOutcome::Success,
            &[
                ("slot", resolution.slot.clone()),
                ("decision", decision.as_str().to_string()),
                ("value", resolution.value.clone().unwrap_or_default()),
            ],
        );
    }

    /// Composes the rest of the response once this turn's slot updates are applied.
    fn finish_turn(&mut self, turn: &TurnResult, reply: &mut Reply) {
        if let Some(recorded) = self.responses().recorded(&self.session.form, &turn.slots_updated) {
            reply.push(recorded);
        }

        if self.session.awaiting_conflict.is_some() {
            if self.session.lifecycle == LifecycleState::ReadyConfirm {
                self.transition(LifecycleEvent::FormInvalidated, reply);
            } else {
                self.prompt_next(reply);
            }
            return;
        }

        if self.session.form.is_complete() {
            if self.session.lifecycle == LifecycleState::ReadyConfirm {
                self.present_summary(reply);
            } else {
                self.complete_form(reply);
            }
            return;
        }

        let refilled = self
            .session
            .refilling_slot()
            .is_some_and(|slot| self.session.form.is_filled(slot));
        match self.session.lifecycle {
            LifecycleState::ReadyConfirm => {
                self.transition(LifecycleEvent::FormInvalidated, reply);
            }
            LifecycleState::Reselecting if refilled => {
                self.session.reselect = ReselectStage::Idle;
                self.transition(LifecycleEvent::ReselectIncomplete, reply);
            }
            _ => self.prompt_next(reply),
        }
    }

    /// All required slots are FILLED: validate, then either present the summary or report.
    fn complete_form(&mut self, reply: &mut Reply) {
        self.session.reselect = ReselectStage::Idle;
        let errors = self.validators.run(&self.session.form.filled_values());
        if errors.is_empty() {
            self.transition(LifecycleEvent::FormValidated, reply);
        } else {
            self.report_validation_failure(errors, reply);
        }
    }

    fn report_validation_failure(&mut self, errors: Vec<String>, reply: &mut Reply) {
        info!(
            event_name = "dialog.validation.failed",
            session_id = %self.session.session_id,
            violations = errors.len(),
            "combination rejected"
        );
        self.audit(
            "validation.failed",
            AuditCategory::Validation,
            AuditOutcome::Rejected,
            &[("messages", errors.join(" | "))],
        );
        reply.push(self.responses().validation_failure(&errors));
        self.session.validation_errors = errors;
        self.transition(LifecycleEvent::ReselectRequested, reply);
    }

    fn confirm(&mut self, reply: &mut Reply) {
        let errors = self.validators.run(&self.session.form.filled_values());
        if !errors.is_empty() {
            self.report_validation_failure(errors, reply);
            return;
        }

        if !self.transition(LifecycleEvent::ConfirmRequested, reply) {
            let texts = self.responses();
            let missing: Vec<String> = self
                .session
                .form
                .missing_required()
                .iter()
                .map(|slot| texts.slot_description(slot))
                .collect();
            let missing = missing.join("、");
            reply.push(texts.render(responses::INFO_INCOMPLETE, &[("missing", missing.as_str())]));
            self.prompt_next(reply);
            return;
        }

        let mut lines = vec![self.responses().text(responses::ORDER_CONFIRMED), String::new()];
        for slot in self.session.form.slots().filter(|slot| slot.is_filled()) {
            if let Some(value) = slot.current_value() {
                lines.push(format!("  • {}: {}", slot.definition.display_name(), value));
            }
        }
        reply.push(lines.join("\n"));
        self.transition(LifecycleEvent::ContinuePromptIssued, reply);
    }

    fn present_summary(&mut self, reply: &mut Reply) {
        self.session.last_prompted_slot = None;
        reply.push(self.responses().summary(&self.session.form));
        reply.push(self.responses().text(responses::CONFIRMATION_OPTIONS));
    }

    fn prompt_next(&mut self, reply: &mut Reply) {
        if let Some(slot) = self.session.awaiting_conflict.clone() {
            reply.push(self.conflict_prompt(&slot));
            return;
        }
        let missing = self.session.form.missing_required();
        match next_slot_to_prompt(&self.session.form, &missing) {
            Some(slot) => {
                reply.push(slot_prompt(&self.config, &self.session.form, &slot));
                self.session.last_prompted_slot = Some(slot);
            }
            None => {
                self.session.last_prompted_slot = None;
                reply.push(self.responses().text(responses::CONTINUE_FILLING));
            }
        }
    }

    fn conflict_prompt(&self, slot: &str) -> String {
        let texts = self.responses();
        let description = texts.slot_description(slot);
        let Some(form_slot) = self.session.form.get(slot) else {
            return texts.text(responses::CONFLICT_OPTIONS);
        };
        let describe = |value: Option<&SlotValue>| {
            value
                .map(|value| (value.value.clone(), source_description(value.provenance)))
                .unwrap_or_default()
        };
        let (old_value, old_source) = describe(form_slot.value.as_ref());
        let (new_value, new_source) = describe(form_slot.candidates.last());

        [
            texts.render(responses::CONFLICT_INTRO, &[("slot_desc", description.as_str())]),
            texts.render(
                responses::CONFLICT_EXISTING,
                &[("old_value", old_value.as_str()), ("old_source", old_source)],
            ),
            texts.render(
                responses::CONFLICT_NEW,
                &[("new_value", new_value.as_str()), ("new_source", new_source)],
            ),
            texts.text(responses::CONFLICT_OPTIONS),
        ]
        .join("\n")
    }

    /// Applies a lifecycle event and carries out the actions it yields. Rejections are
    /// logged and leave the state untouched.
    fn transition(&mut self, event: LifecycleEvent, reply: &mut Reply) -> bool {
        let context = LifecycleContext::new(self.session.form.missing_required());
        let current = self.session.lifecycle;
        let result = match &self.audit_sink {
            Some(sink) => self.lifecycle.apply_with_audit(
                current,
                &event,
                &context,
                sink.as_ref(),
                &self.audit_context(),
            ),
            None => self.lifecycle.apply(current, &event, &context),
        };

        match result {
            Ok(outcome) => {
                debug!(
                    event_name = "lifecycle.transition.applied",
                    session_id = %self.session.session_id,
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    "lifecycle advanced"
                );
                self.session.lifecycle = outcome.to;
                for action in outcome.actions {
                    self.perform(action, reply);
                }
                true
            }
            Err(error) => {
                warn!(
                    event_name = "lifecycle.transition.rejected",
                    session_id = %self.session.session_id,
                    state = current.as_str(),
                    error = %error,
                    "lifecycle event ignored"
                );
                false
            }
        }
    }

    fn perform(&mut self, action: LifecycleAction, reply: &mut Reply) {
        match action {
            LifecycleAction::PresentSummary => self.present_summary(reply),
            LifecycleAction::SnapshotOrder => {
                let snapshot = self.session.form.filled_values();
                info!(
                    event_name = "dialog.order.confirmed",
                    session_id = %self.session.session_id,
                    business = %self.config.id(),
                    slots = snapshot.len(),
                    "order confirmed"
                );
                self.audit(
                    "order.confirmed",
                    AuditCategory::Lifecycle,
                    AuditOutcome::Success,
                    &[("slots", snapshot.len().to_string())],
                );
                self.session.confirmed_order = Some(snapshot);
            }
            LifecycleAction::PromptContinue => {
                reply.push(self.responses().text(responses::ORDER_THANKS));
            }
            LifecycleAction::ListReselectableSlots => {
                self.session.reselect = ReselectStage::AwaitingPick;
                self.session.last_prompted_slot = None;
                let slots = self.session.reselectable_slots();
                reply.push(self.responses().reselect_menu(&self.session.form, &slots));
            }
            LifecycleAction::ClearSlotAndDependents { slot } => {
                let cleared = self.session.clear_slot(&slot);
                debug!(
                    event_name = "dialog.slots.cleared",
                    session_id = %self.session.session_id,
                    cleared = ?cleared,
                    "slot and dependents cleared"
                );
            }
            LifecycleAction::PromptSlot { slot } => {
                let texts = self.responses();
                let description = texts.slot_description(&slot);
                reply.push(texts.render(
                    responses::RESELECT_PROMPT_PREFIX,
                    &[("slot_desc", description.as_str())],
                ));
                reply.push(slot_prompt(&self.config, &self.session.form, &slot));
                self.session.last_prompted_slot = Some(slot.clone());
                self.session.reselect = ReselectStage::Refilling { slot };
            }
            LifecycleAction::ResetForm => {
                self.session.reset_form();
                self.ensure_auto_filled();
            }
            LifecycleAction::PromptNextSlot => self.prompt_next(reply),
            LifecycleAction::SignalExit => {
                reply.push(self.responses().text(responses::GOODBYE));
                reply.should_exit = true;
            }
        }
    }

    fn audit_context(&self) -> AuditContext {
        AuditContext::new(
            self.session.session_id.clone(),
            self.config.id(),
            format!("{}:{}", self.session.session_id, self.session.version),
            AUDIT_ACTOR,
        )
    }

    fn audit(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let Some(sink) = &self.audit_sink else { return };
        let event = metadata.iter().fold(
            AuditEvent::new(&self.audit_context(), event_type, category, outcome),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::DialogEngine;
    use crate::business::BusinessConfig;
    use crate::errors::DomainError;
    use crate::flows::LifecycleState;
    use crate::form::{Provenance, SlotStatus};

    const DINING: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/businesses/dining.json"));

    fn dining() -> DialogEngine {
        let config = BusinessConfig::from_json("dining", DINING).expect("config");
        DialogEngine::new(Arc::new(config)).with_session_id("test-session")
    }

    #[test]
    fn initial_prompt_auto_fills_and_asks_the_first_open_slot() {
        let mut engine = dining();

        let prompt = engine.initial_prompt();

        assert!(prompt.starts_with("🍽️ 欢迎使用餐饮预订服务！"));
        assert!(prompt.contains("想去哪家餐厅？\n1. 海底捞"));
        assert_eq!(engine.state().form.value_of("category"), Some("餐饮预订"));
        assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("brand"));
    }

    #[test]
    fn free_text_slot_accepts_digits_verbatim() {
        let mut engine = dining();
        engine.initial_prompt();
        engine.process_turn("海底捞");
        engine.process_turn("晚餐");

        let turn = engine.process_turn("6");

        assert_eq!(turn.slots_filled, vec!["party_size"]);
        let value = engine.state().form.get("party_size").and_then(|slot| slot.value.clone());
        assert_eq!(value.map(|value| (value.value, value.provenance)), Some(("6".to_string(), Provenance::FreeText)));
        assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("date"));
    }

    #[test]
    fn prefill_validates_slot_and_value() {
        let mut engine = dining();

        assert!(matches!(engine.prefill("dessert", "布丁"), Err(DomainError::UnknownSlot { .. })));
        assert!(matches!(engine.prefill("date", "下周"), Err(DomainError::InvariantViolation(_))));

        let outcome = engine.prefill("date", "明日").expect("known alias");
        assert!(outcome.filled);
        assert_eq!(engine.state().form.value_of("date"), Some("明天"));
        assert_eq!(engine.state().form.status("date"), Some(SlotStatus::Filled));
    }

    #[test]
    fn repeating_a_value_keeps_outstanding_validation_errors() {
        let mut engine = dining();
        engine.prefill("date", "明天").expect("known alias");
        engine.session.validation_errors = vec!["包间需提前一天预订".to_string()];

        let outcome = engine.prefill("date", "明日").expect("known alias");

        assert!(outcome.reinforced);
        assert!(!outcome.updated && !outcome.conflict);
        assert_eq!(engine.state().validation_errors, vec!["包间需提前一天预订"]);
        assert_eq!(engine.state().form.status("date"), Some(SlotStatus::Filled));
    }

    #[test]
    fn empty_input_repeats_the_current_question() {
        let mut engine = dining();
        let first = engine.initial_prompt();

        let turn = engine.process_turn("   ");

        assert!(turn.slots_updated.is_empty());
        assert!(first.ends_with(&turn.response));
        assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
        assert_eq!(engine.state().version, 1);
    }
}
