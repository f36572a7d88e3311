use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Collecting,
    ReadyConfirm,
    Confirmed,
    Reselecting,
    AwaitingContinue,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::ReadyConfirm => "ready_confirm",
            Self::Confirmed => "confirmed",
            Self::Reselecting => "reselecting",
            Self::AwaitingContinue => "awaiting_continue",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Every required slot is FILLED and no validation rule fired.
    FormValidated,
    /// A slot was reopened while the order sat at READY_CONFIRM.
    FormInvalidated,
    ConfirmRequested,
    ContinuePromptIssued,
    /// The numbered list of filled slots was shown and a pick is awaited.
    ReselectRequested,
    ReselectPicked { slot: String },
    ReselectIncomplete,
    RestartRequested,
    ContinueRequested,
    EndRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LifecycleContext {
    pub missing_required_slots: Vec<String>,
}

impl LifecycleContext {
    pub fn new(missing_required_slots: Vec<String>) -> Self {
        Self { missing_required_slots }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    PresentSummary,
    SnapshotOrder,
    PromptContinue,
    ListReselectableSlots,
    ClearSlotAndDependents { slot: String },
    PromptSlot { slot: String },
    ResetForm,
    PromptNextSlot,
    SignalExit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
    pub actions: Vec<LifecycleAction>,
}
