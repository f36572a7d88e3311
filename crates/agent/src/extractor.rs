//! Adapts a text-completion model to the core `ModelClient` contract.
//!
//! The model only translates the utterance into slot candidates. Every candidate still goes
//! through the core floor, canonicalization and conflict rules before it can touch a form.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{Map, Value};
use slotform_core::business::{BusinessCatalog, BusinessConfig};
use slotform_core::dialog::filtered_options;
use slotform_core::form::{Form, Provenance, SlotValue};
use slotform_core::model::{ModelClient, ModelError, ModelRequest, ModelSlot};
use tracing::debug;

use crate::guardrails::{ExtractionGuardrails, GuardrailDecision};
use crate::llm::LlmClient;

pub struct ModelSlotExtractor<C> {
    client: C,
    catalog: BusinessCatalog,
    guardrails: ExtractionGuardrails,
    timeout_secs: u64,
}

impl<C> ModelSlotExtractor<C>
where
    C: LlmClient,
{
    pub fn new(client: C, catalog: BusinessCatalog) -> Self {
        Self { client, catalog, guardrails: ExtractionGuardrails::default(), timeout_secs: 0 }
    }

    pub fn with_guardrails(mut self, guardrails: ExtractionGuardrails) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Reported in `ModelError::Timeout` when the client gives up waiting.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn failure(&self, error: anyhow::Error) -> ModelError {
        let timed_out = error
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(reqwest::Error::is_timeout);
        if timed_out {
            ModelError::Timeout(self.timeout_secs)
        } else {
            ModelError::Transport(format!("{error:#}"))
        }
    }
}

impl<C> ModelClient for ModelSlotExtractor<C>
where
    C: LlmClient,
{
    fn extract_slots(
        &self,
        request: &ModelRequest,
    ) -> Result<BTreeMap<String, ModelSlot>, ModelError> {
        let config = self
            .catalog
            .get(&request.business_id)
            .map_err(|error| ModelError::Transport(error.to_string()))?;

        let decision = self.guardrails.evaluate(&request.utterance);
        if let GuardrailDecision::Degrade { reason_code, .. } = &decision {
            debug!(event_name = "agent.guardrails.degraded", reason_code, "utterance adjusted");
        }
        let Some(utterance) = decision.utterance() else {
            return Ok(BTreeMap::new());
        };

        let prompt = build_prompt(&config, request, utterance);
        let raw = self.client.complete(&prompt).map_err(|error| self.failure(error))?;
        let slots = parse_reply(&raw)?;
        let admitted = self.guardrails.admit(request, config.schema(), slots);

        debug!(
            event_name = "agent.model.parsed",
            business = %request.business_id,
            slots = admitted.len(),
            "model reply parsed"
        );
        Ok(admitted)
    }
}

/// Extraction prompt listing known values and, per target slot, its currently allowed options.
pub fn build_prompt(config: &BusinessConfig, request: &ModelRequest, utterance: &str) -> String {
    let form = known_form(config, &request.known_values);
    let mut prompt = String::new();

    let _ = writeln!(prompt, "Business: {} ({})", config.display_name(), config.id());
    if !request.known_values.is_empty() {
        let _ = writeln!(prompt, "Already known:");
        for (slot, value) in &request.known_values {
            let description = config
                .schema()
                .get(slot)
                .map(|definition| definition.display_name().to_string())
                .unwrap_or_else(|| slot.clone());
            let _ = writeln!(prompt, "- {slot} ({description}): {value}");
        }
    }

    let _ = writeln!(prompt, "Slots to extract:");
    for slot in &request.target_slots {
        let Some(definition) = config.schema().get(slot) else { continue };
        match filtered_options(config, &form, slot) {
            Some(view) => {
                let _ = writeln!(
                    prompt,
                    "- {slot} ({}): one of {}",
                    definition.display_name(),
                    view.labels().join(" / ")
                );
            }
            None => {
                let _ = writeln!(prompt, "- {slot} ({}): free text", definition.display_name());
            }
        }
    }

    let _ = writeln!(prompt, "Customer message: {utterance}");
    let _ = write!(
        prompt,
        "Return JSON shaped as {{\"slots\": {{\"<slot>\": {{\"value\": \"<option>\", \"confidence\": <0..1>, \"reason\": \"<short>\"}}}}}}. \
         Use option text exactly as listed and leave out slots the message does not mention."
    );
    prompt
}

fn known_form(config: &BusinessConfig, known: &BTreeMap<String, String>) -> Form {
    let mut form = Form::new(config.shared_schema());
    for (slot, value) in known {
        if let Some(entry) = form.get_mut(slot) {
            entry.assign(SlotValue::new(value.clone(), 1.0, Provenance::FreeText, "known"));
        }
    }
    form
}

/// Parses a model reply into slot entries.
///
/// Accepts surrounding prose or code fences, an optional top-level `slots` object, and bare
/// scalar values in place of `{value, confidence, reason}` objects.
pub fn parse_reply(raw: &str) -> Result<BTreeMap<String, ModelSlot>, ModelError> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(ModelError::Malformed("no JSON object in reply".to_string()));
    };
    if end < start {
        return Err(ModelError::Malformed("no JSON object in reply".to_string()));
    }

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|error| ModelError::Malformed(error.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ModelError::Malformed("reply is not a JSON object".to_string()));
    };
    let entries: Map<String, Value> = match object.remove("slots") {
        Some(Value::Object(slots)) => slots,
        Some(_) => return Err(ModelError::Malformed("`slots` is not an object".to_string())),
        None => object,
    };

    Ok(entries
        .into_iter()
        .filter_map(|(name, entry)| slot_from_value(&entry).map(|slot| (name, slot)))
        .collect())
}

fn slot_from_value(entry: &Value) -> Option<ModelSlot> {
    match entry {
        Value::Null => None,
        Value::Object(fields) => Some(ModelSlot {
            value: fields.get("value").and_then(scalar_text),
            confidence: fields.get("confidence").and_then(confidence_of),
            reason: fields.get("reason").and_then(Value::as_str).map(str::to_string),
        }),
        other => scalar_text(other).map(|text| ModelSlot { value: Some(text), ..ModelSlot::default() }),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn confidence_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};
    use slotform_core::business::BusinessCatalog;
    use slotform_core::model::{ModelClient, ModelError, ModelRequest, ModelSlot};

    use super::{parse_reply, ModelSlotExtractor};
    use crate::llm::LlmClient;

    struct FakeLlm {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeLlm {
        fn answering(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) }
        }

        fn failing(message: &str) -> Self {
            Self { reply: Err(message.to_string()), prompts: Mutex::new(Vec::new()) }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("prompts").clone()
        }
    }

    impl LlmClient for FakeLlm {
        fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().expect("prompts").push(prompt.to_string());
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }

    fn catalog() -> BusinessCatalog {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/businesses");
        BusinessCatalog::load_dir(&dir).expect("business configs")
    }

    fn laptop_request(utterance: &str) -> ModelRequest {
        ModelRequest {
            utterance: utterance.to_string(),
            business_id: "apple_store".to_string(),
            target_slots: vec!["chip".to_string(), "color".to_string()],
            known_values: BTreeMap::from([
                ("category".to_string(), "电脑".to_string()),
                ("series".to_string(), "MacBook Pro".to_string()),
            ]),
        }
    }

    #[test]
    fn prompt_lists_known_values_and_filtered_options() {
        let extractor = ModelSlotExtractor::new(FakeLlm::answering("{}"), catalog());

        extractor.extract_slots(&laptop_request("要性能强一点的")).expect("extract");

        let prompts = extractor.client.prompts();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.contains("- series (产品系列): MacBook Pro"));
        assert!(prompt.contains("- chip (芯片): one of M3 / M3 Pro / M3 Max"));
        assert!(!prompt.contains("A18"));
        assert!(prompt.contains("- color (颜色): one of 深空灰 / 银色 / 午夜色 / 星光色"));
        assert!(prompt.contains("Customer message: 要性能强一点的"));
    }

    #[test]
    fn fenced_reply_with_slots_key_is_parsed_and_filtered() {
        let reply = "Sure! Here you go:\n```json\n{\"slots\": {\"chip\": {\"value\": \"M3 Pro\", \"confidence\": 0.82, \"reason\": \"性能\"}, \"mood\": {\"value\": \"happy\", \"confidence\": 0.9}}}\n```";
        let extractor = ModelSlotExtractor::new(FakeLlm::answering(reply), catalog());

        let slots = extractor.extract_slots(&laptop_request("性能强")).expect("extract");

        assert_eq!(slots.len(), 1);
        let chip = &slots["chip"];
        assert_eq!(chip.value.as_deref(), Some("M3 Pro"));
        assert_eq!(chip.confidence, Some(0.82));
        assert_eq!(chip.reason.as_deref(), Some("性能"));
    }

    #[test]
    fn loose_entries_are_tolerated() {
        let slots = parse_reply(r#"{"storage": 512, "color": {"value": "银色", "confidence": "0.7"}, "size": null}"#)
            .expect("parse");

        assert_eq!(slots["storage"], ModelSlot { value: Some("512".to_string()), ..ModelSlot::default() });
        assert_eq!(slots["color"].confidence, Some(0.7));
        assert!(!slots.contains_key("size"));
    }

    #[test]
    fn malformed_replies_map_to_model_errors() {
        struct Case {
            name: &'static str,
            raw: &'static str,
        }

        let cases = [
            Case { name: "plain prose", raw: "I am not sure what you mean." },
            Case { name: "broken json", raw: "{\"chip\": }" },
            Case { name: "slots not an object", raw: "{\"slots\": [1, 2]}" },
            Case { name: "reversed braces", raw: "} oops {" },
        ];

        for case in cases {
            assert!(matches!(parse_reply(case.raw), Err(ModelError::Malformed(_))), "{}", case.name);
        }
    }

    #[test]
    fn client_failure_becomes_transport_error() {
        let extractor = ModelSlotExtractor::new(FakeLlm::failing("connection refused"), catalog());

        let error = extractor.extract_slots(&laptop_request("银色")).expect_err("fails");

        assert_eq!(error, ModelError::Transport("connection refused".to_string()));
    }

    #[test]
    fn blank_utterance_skips_the_call() {
        let extractor = ModelSlotExtractor::new(FakeLlm::answering("{}"), catalog());

        let slots = extractor.extract_slots(&laptop_request(" \u{7} ")).expect("extract");

        assert!(slots.is_empty());
        assert!(extractor.client.prompts().is_empty());
    }

    #[test]
    fn unknown_business_is_reported() {
        let extractor = ModelSlotExtractor::new(FakeLlm::answering("{}"), catalog());
        let mut request = laptop_request("银色");
        request.business_id = "bakery".to_string();

        assert!(matches!(extractor.extract_slots(&request), Err(ModelError::Transport(_))));
    }
}
