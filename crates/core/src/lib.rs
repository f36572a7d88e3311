pub mod audit;
pub mod business;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod flows;
pub mod form;
pub mod matching;
pub mod model;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use business::{BusinessCatalog, BusinessConfig, BusinessConfigError};
pub use config::{AppConfig, ConfigError, LlmConfig, LlmProvider, LoadOptions};
pub use dialog::{ConflictDecision, ConflictRecord, DialogEngine, SessionState, TurnResult};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{LifecycleEngine, LifecycleEvent, LifecycleState, OrderLifecycle};
pub use form::{Form, FormSchema, Provenance, SlotDefinition, SlotStatus, SlotValue};
pub use matching::{EnumTable, KeywordScorer, SemanticScorer};
pub use model::{ModelClient, ModelError, ModelRequest, ModelSlot, ScriptedModelClient};
