//! Lexical and semantic matching of user text against enumerated options.

pub mod alias;
pub mod scoring;

pub use alias::{AliasHit, CompiledOption, EnumOption, EnumTable, MatchKind, OptionView};
pub use scoring::{
    KeywordScorer, ScoreResult, ScoredOption, ScoringWeights, SemanticScorer, SemanticStage,
    StageOption, StageVariant, SEMANTIC_CONFIDENCE_FLOOR,
};
