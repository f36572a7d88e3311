use std::collections::BTreeMap;

use slotform_core::form::FormSchema;
use slotform_core::model::{ModelRequest, ModelSlot};
use tracing::debug;

pub const DEFAULT_MAX_UTTERANCE_CHARS: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow { utterance: String },
    Degrade { utterance: String, reason_code: &'static str },
    Deny { reason_code: &'static str },
}

impl GuardrailDecision {
    /// Text to send to the model, if any.
    pub fn utterance(&self) -> Option<&str> {
        match self {
            Self::Allow { utterance } | Self::Degrade { utterance, .. } => Some(utterance),
            Self::Deny { .. } => None,
        }
    }
}

/// Limits on what goes to the model and what comes back from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionGuardrails {
    pub max_utterance_chars: usize,
}

impl Default for ExtractionGuardrails {
    fn default() -> Self {
        Self { max_utterance_chars: DEFAULT_MAX_UTTERANCE_CHARS }
    }
}

impl ExtractionGuardrails {
    pub fn evaluate(&self, utterance: &str) -> GuardrailDecision {
        let cleaned: String = utterance
            .chars()
            .map(|ch| if ch == '\n' || ch == '\t' { ' ' } else { ch })
            .filter(|ch| !ch.is_control())
            .collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return GuardrailDecision::Deny { reason_code: "empty_utterance" };
        }

        if cleaned.chars().count() > self.max_utterance_chars {
            let truncated: String = cleaned.chars().take(self.max_utterance_chars).collect();
            return GuardrailDecision::Degrade {
                utterance: truncated,
                reason_code: "utterance_truncated",
            };
        }
        GuardrailDecision::Allow { utterance: cleaned.to_string() }
    }

    /// Keeps entries for requested targets and other declared slots; everything else is dropped.
    pub fn admit(
        &self,
        request: &ModelRequest,
        schema: &FormSchema,
        slots: BTreeMap<String, ModelSlot>,
    ) -> BTreeMap<String, ModelSlot> {
        slots
            .into_iter()
            .filter(|(name, _)| {
                let known = request.target_slots.contains(name) || schema.contains(name);
                if !known {
                    debug!(event_name = "agent.guardrails.slot_dropped", slot = %name, "undeclared slot");
                }
                known
            })
            .collect()
    }
}
