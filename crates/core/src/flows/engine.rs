use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    LifecycleAction, LifecycleContext, LifecycleEvent, LifecycleState, TransitionOutcome,
};

pub trait LifecycleDefinition {
    fn name(&self) -> &'static str;
    fn initial_state(&self) -> LifecycleState;
    fn transition(
        &self,
        current: LifecycleState,
        event: &LifecycleEvent,
        context: &LifecycleContext,
    ) -> Result<TransitionOutcome, LifecycleTransitionError>;
}

/// Collect, confirm, then offer another round.
#[derive(Clone, Debug, Default)]
pub struct OrderLifecycle;

impl LifecycleDefinition for OrderLifecycle {
    fn name(&self) -> &'static str {
        "order"
    }

    fn initial_state(&self) -> LifecycleState {
        LifecycleState::Collecting
    }

    fn transition(
        &self,
        current: LifecycleState,
        event: &LifecycleEvent,
        context: &LifecycleContext,
    ) -> Result<TransitionOutcome, LifecycleTransitionError> {
        transition_order(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleEngine<F> {
    lifecycle: F,
}

impl<F> LifecycleEngine<F>
where
    F: LifecycleDefinition,
{
    pub fn new(lifecycle: F) -> Self {
        Self { lifecycle }
    }

    pub fn name(&self) -> &'static str {
        self.lifecycle.name()
    }

    pub fn initial_state(&self) -> LifecycleState {
        self.lifecycle.initial_state()
    }

    pub fn apply(
        &self,
        current: LifecycleState,
        event: &LifecycleEvent,
        context: &LifecycleContext,
    ) -> Result<TransitionOutcome, LifecycleTransitionError> {
        self.lifecycle.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: LifecycleState,
        event: &LifecycleEvent,
        context: &LifecycleContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, LifecycleTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "lifecycle.transition_applied",
                        AuditCategory::Lifecycle,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "lifecycle.transition_rejected",
                        AuditCategory::Lifecycle,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for LifecycleEngine<OrderLifecycle> {
    fn default() -> Self {
        Self::new(OrderLifecycle)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleTransitionError {
    #[error("missing required slots before transition from {state:?}: {missing:?}")]
    MissingRequiredSlots { state: LifecycleState, missing: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: LifecycleState, event: LifecycleEvent },
}

fn transition_order(
    current: LifecycleState,
    event: &LifecycleEvent,
    context: &LifecycleContext,
) -> Result<TransitionOutcome, LifecycleTransitionError> {
    use LifecycleAction::{
        ClearSlotAndDependents, ListReselectableSlots, PresentSummary, PromptContinue,
        PromptNextSlot, PromptSlot, ResetForm, SignalExit, SnapshotOrder,
    };
    use LifecycleEvent::{
        ConfirmRequested, ContinuePromptIssued, ContinueRequested, EndRequested, FormInvalidated,
        FormValidated, ReselectIncomplete, ReselectPicked, ReselectRequested, RestartRequested,
    };
    use LifecycleState::{AwaitingContinue, Collecting, Confirmed, ReadyConfirm, Reselecting};

    let require_complete = || {
        if context.missing_required_slots.is_empty() {
            Ok(())
        } else {
            Err(LifecycleTransitionError::MissingRequiredSlots {
                state: current,
                missing: context.missing_required_slots.clone(),
            })
        }
    };

    let (to, actions) = match (current, event) {
        (Collecting, FormValidated) | (Reselecting, FormValidated) => {
            require_complete()?;
            (ReadyConfirm, vec![PresentSummary])
        }
        (ReadyConfirm, FormInvalidated) => (Collecting, vec![PromptNextSlot]),
        (ReadyConfirm, ConfirmRequested) => {
            require_complete()?;
            (Confirmed, vec![SnapshotOrder])
        }
        (Confirmed, ContinuePromptIssued) => (AwaitingContinue, vec![PromptContinue]),
        (ReadyConfirm, ReselectRequested)
        | (Collecting, ReselectRequested)
        | (Reselecting, ReselectRequested) => (Reselecting, vec![ListReselectableSlots]),
        (Reselecting, ReselectPicked { slot }) => (
            Reselecting,
            vec![ClearSlotAndDependents { slot: slot.clone() }, PromptSlot { slot: slot.clone() }],
        ),
        (Reselecting, ReselectIncomplete) => (Collecting, vec![PromptNextSlot]),
        (Collecting, RestartRequested)
        | (ReadyConfirm, RestartRequested)
        | (Reselecting, RestartRequested) => (Collecting, vec![ResetForm, PromptNextSlot]),
        (AwaitingContinue, ContinueRequested) => (Collecting, vec![ResetForm, PromptNextSlot]),
        (AwaitingContinue, EndRequested) => (AwaitingContinue, vec![SignalExit]),
        _ => {
            return Err(LifecycleTransitionError::InvalidTransition {
                state: current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current, to, event: event.clone(), actions })
}
