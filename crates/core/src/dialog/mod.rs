//! Turn processing: extraction, conflict arbitration, sequencing and the order lifecycle.

mod conflict;
mod engine;
mod extraction;
pub mod responses;
mod sequencer;
mod session;
mod validation;

pub use conflict::{
    apply_update, resolve_conflict, should_conflict, ConflictDecision, Resolution, UpdateOutcome,
    CONFLICT_CONFIDENCE, PRIORITY_CONFLICT_CONFIDENCE,
};
pub use engine::{
    DialogEngine, TurnResult, FREE_TEXT_CONFIDENCE, NUMERIC_SELECTION_CONFIDENCE,
    UNIQUE_MATCH_CONFIDENCE,
};
pub use extraction::{Extraction, Extractor, COLLATERAL_CONFIDENCE, DIRECT_ALIAS_CONFIDENCE};
pub use sequencer::{
    auto_fill_single_options, filtered_options, next_slot_to_prompt, slot_prompt,
    AUTO_SINGLE_OPTION_CONFIDENCE,
};
pub use session::{ConflictRecord, ReselectStage, SessionState};
pub use validation::{ExclusionRule, Validator, ValidatorFault, ValidatorSet};
