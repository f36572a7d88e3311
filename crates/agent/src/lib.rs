//! Model adapter for the slot-filling engine.
//!
//! - `llm`: the text-completion seam and an OpenAI-compatible chat completions client
//! - `extractor`: prompt construction and reply parsing behind the core `ModelClient` trait
//! - `guardrails`: what may be sent to the model and which reply entries are kept
//!
//! The model is a translator only. It never fills a slot directly: the core engine applies its
//! confidence floor, option canonicalization and conflict rules to everything returned here.

pub mod extractor;
pub mod guardrails;
pub mod llm;

pub use extractor::{build_prompt, parse_reply, ModelSlotExtractor};
pub use guardrails::{ExtractionGuardrails, GuardrailDecision};
pub use llm::{is_retryable_status, ChatCompletionsClient, LlmClient, RetryPolicy};
