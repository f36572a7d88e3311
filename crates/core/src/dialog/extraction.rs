//! Three-layer slot extraction: direct aliases, then recommendations, then the external model.
//!
//! Each slot receives at most one value per turn and an earlier layer always wins.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::sequencer::filtered_options;
use crate::business::{BusinessConfig, Derivation};
use crate::form::{Form, Provenance, SlotStatus, SlotValue};
use crate::matching::SemanticScorer;
use crate::model::{ModelClient, ModelError, ModelRequest, MODEL_CONFIDENCE_FLOOR};

pub const DIRECT_ALIAS_CONFIDENCE: f64 = 0.95;
pub const COLLATERAL_CONFIDENCE: f64 = 0.85;

/// Values found in one utterance, in the order they should be applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub values: Vec<(String, SlotValue)>,
    pub model_failure: Option<ModelError>,
}

impl Extraction {
    pub fn contains(&self, slot: &str) -> bool {
        self.values.iter().any(|(name, _)| name == slot)
    }

    pub fn get(&self, slot: &str) -> Option<&SlotValue> {
        self.values.iter().find(|(name, _)| name == slot).map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn push(&mut self, slot: &str, value: SlotValue) {
        if !self.contains(slot) {
            self.values.push((slot.to_string(), value));
        }
    }
}

/// Read-only view of what one extraction pass may consult.
pub struct Extractor<'a> {
    config: &'a BusinessConfig,
    form: &'a Form,
    scorer: Option<&'a dyn SemanticScorer>,
    model: Option<&'a dyn ModelClient>,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a BusinessConfig, form: &'a Form) -> Self {
        Self { config, form, scorer: None, model: None }
    }

    pub fn with_scorer(mut self, scorer: Option<&'a dyn SemanticScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_model(mut self, model: Option<&'a dyn ModelClient>) -> Self {
        self.model = model;
        self
    }

    pub fn extract(&self, utterance: &str) -> Extraction {
        let mut extraction = Extraction::default();
        self.direct_matches(utterance, &mut extraction);
        self.recommendations(utterance, &mut extraction);
        self.model_fallback(utterance, &mut extraction);
        extraction
    }

    fn empty_slots(&self) -> impl Iterator<Item = &'a str> + 'a {
        let config = self.config;
        let form = self.form;
        config
            .schema()
            .definitions()
            .iter()
            .map(|definition| definition.name.as_str())
            .filter(move |name| form.status(name) == Some(SlotStatus::Empty))
    }

    /// Layer 1, plus collateral values implied by a direct hit.
    fn direct_matches(&self, utterance: &str, extraction: &mut Extraction) {
        let mut hits = Vec::new();
        for slot in self.empty_slots() {
            let Some(view) = filtered_options(self.config, self.form, slot) else { continue };
            let Some(hit) = view.best_alias_match(utterance, self.config.weak_aliases(slot)) else {
                continue;
            };
            extraction.push(
                slot,
                SlotValue::new(
                    hit.label,
                    DIRECT_ALIAS_CONFIDENCE,
                    Provenance::DirectAlias,
                    format!("关键词'{}'匹配", hit.alias),
                ),
            );
            hits.push((slot, hit.label));
        }

        for (source, label) in hits {
            for rule in self.config.collateral_for(source) {
                for derivation in &rule.derive {
                    let target = derivation.target();
                    if extraction.contains(target)
                        || self.form.status(target) != Some(SlotStatus::Empty)
                    {
                        continue;
                    }
                    let value = match derivation {
                        Derivation::Lookup { lookup, .. } => self
                            .config
                            .filter(lookup)
                            .and_then(|filter| filter.reverse_lookup(label)),
                        Derivation::Fixed { value, .. } => Some(value.as_str()),
                    };
                    let Some(value) = value else { continue };
                    extraction.push(
                        target,
                        SlotValue::new(
                            value,
                            COLLATERAL_CONFIDENCE,
                            Provenance::DirectAlias,
                            format!("由{label}推断"),
                        ),
                    );
                }
            }
        }
    }

    /// Layer 2: semantic scoring first, then the intent keyword table.
    fn recommendations(&self, utterance: &str, extraction: &mut Extraction) {
        let known = self.form.filled_values();
        let text = utterance.to_lowercase();
        let slots: Vec<&str> = self
            .empty_slots()
            .filter(|slot| !extraction.contains(slot) && self.form.dependencies_met(slot))
            .collect();

        for slot in slots {
            if let Some(value) = self.semantic_pick(slot, utterance, &known) {
                extraction.push(slot, value);
                continue;
            }
            if let Some(value) = self.intent_pick(slot, &text) {
                extraction.push(slot, value);
            }
        }
    }

    fn semantic_pick(
        &self,
        slot: &str,
        utterance: &str,
        known: &BTreeMap<String, String>,
    ) -> Option<SlotValue> {
        let scorer = self.scorer?;
        let options = self
            .config
            .schema()
            .get(slot)?
            .stage_chain()
            .filter_map(|stage_id| self.config.semantic_stage(stage_id))
            .map(|stage| stage.build_options(known))
            .find(|options| !options.is_empty())?;
        let result = scorer.score(utterance, &options);
        let chosen = result.chosen_index?;
        let option = options.iter().find(|option| option.index == chosen)?;
        let label = filtered_options(self.config, self.form, slot)?.canonicalize(&option.label)?;
        Some(SlotValue::new(label, result.confidence, Provenance::Semantic, result.reason))
    }

    fn intent_pick(&self, slot: &str, lowered: &str) -> Option<SlotValue> {
        let rule = self.config.intent_rules(slot).iter().find(|rule| {
            rule.keywords.iter().any(|keyword| {
                let keyword = keyword.trim().to_lowercase();
                !keyword.is_empty() && lowered.contains(&keyword)
            })
        })?;
        let value = match filtered_options(self.config, self.form, slot) {
            Some(view) => view.canonicalize(&rule.recommend)?.to_string(),
            None => rule.recommend.clone(),
        };
        let reason = if rule.reason.is_empty() { rule.intent.clone() } else { rule.reason.clone() };
        Some(SlotValue::new(value, rule.confidence, Provenance::IntentRecommendation, reason))
    }

    /// Layer 3. Called only when some EMPTY, eligible slot permits model filling.
    fn model_fallback(&self, utterance: &str, extraction: &mut Extraction) {
        let Some(model) = self.model else { return };
        let target_slots: Vec<String> = self
            .empty_slots()
            .filter(|slot| !extraction.contains(slot) && self.form.dependencies_met(slot))
            .filter(|slot| self.config.schema().get(slot).is_some_and(|spec| spec.allow_model))
            .map(str::to_string)
            .collect();
        if target_slots.is_empty() {
            return;
        }

        let request = ModelRequest {
            utterance: utterance.to_string(),
            business_id: self.config.id().to_string(),
            target_slots,
            known_values: self.form.filled_values(),
        };
        let reply = match model.extract_slots(&request) {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "extraction.model.failed",
                    business = %self.config.id(),
                    error = %error,
                    "model layer skipped for this turn"
                );
                extraction.model_failure = Some(error);
                return;
            }
        };

        let mut accepted: Vec<(String, String, f64, String)> = Vec::new();
        for (slot, result) in reply {
            if extraction.contains(&slot) {
                continue;
            }
            let Some(definition) = self.config.schema().get(&slot) else {
                debug!(event_name = "extraction.model.unknown_slot", slot = %slot, "dropped");
                continue;
            };
            if !definition.allow_model {
                continue;
            }
            let Some(raw) = result.value.as_deref().map(str::trim).filter(|raw| !raw.is_empty())
            else {
                continue;
            };
            let confidence = result.confidence.unwrap_or(0.0);
            if confidence < MODEL_CONFIDENCE_FLOOR {
                debug!(
                    event_name = "extraction.model.below_floor",
                    slot = %slot,
                    confidence,
                    "dropped"
                );
                continue;
            }
            let value = match filtered_options(self.config, self.form, &slot) {
                Some(view) => match view.canonicalize(raw) {
                    Some(label) => label.to_string(),
                    None => continue,
                },
                None => raw.to_string(),
            };
            let reason = result.reason.unwrap_or_else(|| "模型识别".to_string());
            accepted.push((slot, value, confidence, reason));
        }

        let provenance =
            if accepted.len() > 1 { Provenance::ModelMulti } else { Provenance::ModelSingle };
        for (slot, value, confidence, reason) in accepted {
            extraction.push(&slot, SlotValue::new(value, confidence, provenance, reason));
        }
    }
}
