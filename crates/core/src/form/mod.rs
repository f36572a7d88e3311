//! Slot definitions, slot values and the per-session form.

mod schema;

pub use schema::{FormSchema, SchemaError};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A slot only counts as FILLED when its value carries at least this confidence.
pub const FILLED_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Confidence added when the same value is observed again for a FILLED slot.
pub const REINFORCEMENT_STEP: f64 = 0.1;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub enum_key: Option<String>,
    #[serde(default)]
    pub semantic_stage: Option<String>,
    /// Stages tried before `semantic_stage`, usually narrowed to one upstream value.
    #[serde(default)]
    pub priority_stages: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_model: bool,
    #[serde(default)]
    pub description: String,
}

impl SlotDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            dependencies: Vec::new(),
            enum_key: None,
            semantic_stage: None,
            priority_stages: Vec::new(),
            allow_model: true,
            description: String::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|entry| (*entry).to_string()).collect();
        self
    }

    pub fn with_enum(mut self, enum_key: impl Into<String>) -> Self {
        self.enum_key = Some(enum_key.into());
        self
    }

    pub fn with_semantic_stage(mut self, stage: impl Into<String>) -> Self {
        self.semantic_stage = Some(stage.into());
        self
    }

    pub fn with_priority_stage(mut self, stage: impl Into<String>) -> Self {
        self.priority_stages.push(stage.into());
        self
    }

    /// Every stage id this slot may score against, in the order they are tried.
    pub fn stage_chain(&self) -> impl Iterator<Item = &str> + '_ {
        self.priority_stages.iter().map(String::as_str).chain(self.semantic_stage.as_deref())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn without_model(mut self) -> Self {
        self.allow_model = false;
        self
    }

    /// Human label used in prompts and summaries.
    pub fn display_name(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.name
        } else {
            &self.description
        }
    }

    pub fn is_free_text(&self) -> bool {
        self.enum_key.is_none()
    }
}

/// How a slot value was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    NumericSelection,
    DirectAlias,
    UniqueMatch,
    Semantic,
    IntentRecommendation,
    ModelSingle,
    ModelMulti,
    FreeText,
    AutoSingleOption,
}

impl Provenance {
    /// Values the user stated or picked deterministically. Model output never replaces these.
    pub fn is_explicit(self) -> bool {
        matches!(
            self,
            Self::NumericSelection
                | Self::DirectAlias
                | Self::UniqueMatch
                | Self::Semantic
                | Self::IntentRecommendation
        )
    }

    pub fn is_model_derived(self) -> bool {
        matches!(self, Self::ModelSingle | Self::ModelMulti)
    }

    pub fn priority(self) -> u8 {
        match self {
            Self::DirectAlias => 3,
            Self::NumericSelection | Self::Semantic | Self::UniqueMatch => 2,
            Self::ModelSingle | Self::ModelMulti => 1,
            Self::IntentRecommendation | Self::FreeText | Self::AutoSingleOption => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NumericSelection => "numeric_selection",
            Self::DirectAlias => "direct_alias",
            Self::UniqueMatch => "unique_match",
            Self::Semantic => "semantic",
            Self::IntentRecommendation => "intent_recommendation",
            Self::ModelSingle => "model_single",
            Self::ModelMulti => "model_multi",
            Self::FreeText => "free_text",
            Self::AutoSingleOption => "auto_single_option",
        }
    }

    /// Short prefix shown next to a recorded value.
    pub fn display_prefix(self) -> &'static str {
        match self {
            Self::NumericSelection => "(序号) ",
            Self::DirectAlias => "(直接) ",
            Self::UniqueMatch => "(匹配) ",
            Self::Semantic => "(语义) ",
            Self::IntentRecommendation => "(推荐) ",
            Self::ModelSingle | Self::ModelMulti => "(智能) ",
            Self::FreeText => "",
            Self::AutoSingleOption => "(默认) ",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: String,
    pub confidence: f64,
    pub provenance: Provenance,
    pub reason: String,
}

impl SlotValue {
    pub fn new(
        value: impl Into<String>,
        confidence: f64,
        provenance: Provenance,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            provenance,
            reason: reason.into(),
        }
    }

    pub fn meets_fill_threshold(&self) -> bool {
        self.confidence >= FILLED_CONFIDENCE_THRESHOLD
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Empty,
    Partial,
    Filled,
    Conflicted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormSlot {
    pub definition: SlotDefinition,
    pub status: SlotStatus,
    pub value: Option<SlotValue>,
    pub candidates: Vec<SlotValue>,
}

impl FormSlot {
    fn new(definition: SlotDefinition) -> Self {
        Self { definition, status: SlotStatus::Empty, value: None, candidates: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_filled(&self) -> bool {
        self.status == SlotStatus::Filled
    }

    /// EMPTY and PARTIAL slots still need an answer.
    pub fn is_open(&self) -> bool {
        matches!(self.status, SlotStatus::Empty | SlotStatus::Partial)
    }

    pub fn current_value(&self) -> Option<&str> {
        self.value.as_ref().map(|value| value.value.as_str())
    }

    /// Stores `value` as the current value; the status follows the fill threshold.
    pub fn assign(&mut self, value: SlotValue) {
        self.status =
            if value.meets_fill_threshold() { SlotStatus::Filled } else { SlotStatus::Partial };
        self.value = Some(value);
        self.candidates.clear();
    }

    pub fn clear(&mut self) {
        self.status = SlotStatus::Empty;
        self.value = None;
        self.candidates.clear();
    }
}

/// All slots of one business line for one session.
#[derive(Clone, Debug)]
pub struct Form {
    schema: Arc<FormSchema>,
    slots: BTreeMap<String, FormSlot>,
}

impl Form {
    pub fn new(schema: Arc<FormSchema>) -> Self {
        let slots = schema
            .definitions()
            .iter()
            .map(|definition| (definition.name.clone(), FormSlot::new(definition.clone())))
            .collect();
        Self { schema, slots }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&FormSlot> {
        self.slots.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FormSlot> {
        self.slots.get_mut(name)
    }

    /// Slots in declaration order.
    pub fn slots(&self) -> impl Iterator<Item = &FormSlot> + '_ {
        self.schema.definitions().iter().filter_map(|definition| self.slots.get(&definition.name))
    }

    pub fn status(&self, name: &str) -> Option<SlotStatus> {
        self.slots.get(name).map(|slot| slot.status)
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.slots.get(name).and_then(FormSlot::current_value)
    }

    pub fn is_filled(&self, name: &str) -> bool {
        self.slots.get(name).map(FormSlot::is_filled).unwrap_or(false)
    }

    pub fn dependencies_met(&self, name: &str) -> bool {
        self.schema
            .get(name)
            .map(|definition| {
                definition.dependencies.iter().all(|dependency| self.is_filled(dependency))
            })
            .unwrap_or(false)
    }

    /// Required slots that still need an answer, in declaration order.
    pub fn missing_required(&self) -> Vec<String> {
        self.slots()
            .filter(|slot| slot.definition.required && slot.is_open())
            .map(|slot| slot.name().to_string())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots().filter(|slot| slot.definition.required).all(FormSlot::is_filled)
    }

    /// Clears `name` and every slot depending on it, returning the cleared names.
    pub fn clear_with_dependents(&mut self, name: &str) -> Vec<String> {
        if !self.schema.contains(name) {
            return Vec::new();
        }
        let mut cleared = vec![name.to_string()];
        cleared.extend(self.schema.transitive_dependents(name));
        for slot_name in &cleared {
            if let Some(slot) = self.slots.get_mut(slot_name) {
                slot.clear();
            }
        }
        cleared
    }

    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            slot.clear();
        }
    }

    pub fn filled_values(&self) -> BTreeMap<String, String> {
        self.slots()
            .filter(|slot| slot.is_filled())
            .filter_map(|slot| slot.current_value().map(|value| (slot.name().to_string(), value.to_string())))
            .collect()
    }

    /// Every current value regardless of status.
    pub fn current_values(&self) -> BTreeMap<String, String> {
        self.slots()
            .filter_map(|slot| slot.current_value().map(|value| (slot.name().to_string(), value.to_string())))
            .collect()
    }
}
