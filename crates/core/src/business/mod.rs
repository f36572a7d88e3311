//! Per-business-line configuration: slot schema, enumerations, filters, intent tables,
//! validation rules and response templates.
//!
//! A [`BusinessConfig`] is built once, validated, and then shared read-only (`Arc`) by
//! every engine serving that business line.

mod loader;

pub use loader::{load_file, BusinessCatalog};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::form::{FormSchema, SchemaError, SlotDefinition};
use crate::matching::{EnumOption, EnumTable, SemanticStage};

/// Confidence used by intent rules that do not state their own.
pub const DEFAULT_INTENT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Error)]
pub enum BusinessConfigError {
    #[error("could not read business config `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse business config `{business}`: {source}")]
    Parse { business: String, source: serde_json::Error },
    #[error("no business config files (*.json) found in `{0}`")]
    EmptyDirectory(PathBuf),
    #[error("invalid slot schema in `{business}`: {source}")]
    Schema { business: String, source: SchemaError },
    #[error("invalid alias in enum `{key}` of `{business}`: {source}")]
    Pattern { business: String, key: String, source: regex::Error },
    #[error("invalid reference in `{business}`: {message}")]
    Reference { business: String, message: String },
    #[error("unknown business line `{0}`")]
    UnknownBusiness(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
}

/// Restricts the options of `enum_key` by the current value of slot `by`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionFilter {
    pub name: String,
    pub enum_key: String,
    pub by: String,
    pub allowed: BTreeMap<String, Vec<String>>,
}

impl OptionFilter {
    pub fn allowed_for(&self, upstream_value: &str) -> Option<&[String]> {
        self.allowed.get(upstream_value).map(Vec::as_slice)
    }

    /// Upstream value whose allowed list contains `label`.
    pub fn reverse_lookup(&self, label: &str) -> Option<&str> {
        self.allowed
            .iter()
            .find(|(_, labels)| labels.iter().any(|entry| entry == label))
            .map(|(upstream, _)| upstream.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Derivation {
    Lookup { target: String, lookup: String },
    Fixed { target: String, value: String },
}

impl Derivation {
    pub fn target(&self) -> &str {
        match self {
            Self::Lookup { target, .. } | Self::Fixed { target, .. } => target,
        }
    }
}

/// Values implied by a direct hit on `source`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralRule {
    pub source: String,
    pub derive: Vec<Derivation>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentRecommendation {
    #[serde(default)]
    pub intent: String,
    pub keywords: Vec<String>,
    pub recommend: String,
    #[serde(default = "default_intent_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

fn default_intent_confidence() -> f64 {
    DEFAULT_INTENT_CONFIDENCE
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotCondition {
    Equals(String),
    AnyOf(Vec<String>),
    Pattern {
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        lacks: Option<String>,
    },
}

impl SlotCondition {
    pub fn holds(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::AnyOf(expected) => expected.iter().any(|entry| entry == value),
            Self::Pattern { contains, lacks } => {
                contains.as_deref().map(|needle| value.contains(needle)).unwrap_or(true)
                    && lacks.as_deref().map(|needle| !value.contains(needle)).unwrap_or(true)
            }
        }
    }
}

/// Fires its message when every condition holds on the value snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    pub when: BTreeMap<String, SlotCondition>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVariant {
    pub by: String,
    pub templates: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandKeywords {
    pub confirm: Vec<String>,
    pub reselect: Vec<String>,
    pub restart: Vec<String>,
    pub resume: Vec<String>,
    pub end: Vec<String>,
}

fn words(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| (*entry).to_string()).collect()
}

impl Default for CommandKeywords {
    fn default() -> Self {
        Self {
            confirm: words(&["确认", "确认订单", "下单", "提交", "提交订单", "ok", "yes", "confirm"]),
            reselect: words(&["重选", "修改", "重新选择", "change", "edit"]),
            restart: words(&["继续购物", "重新开始", "再选一个", "restart", "reset"]),
            resume: words(&["是", "继续", "继续购物", "再看看", "还要", "continue"]),
            end: words(&["再见", "不了", "结束", "退出", "exit", "quit", "bye", "end"]),
        }
    }
}

fn keyword_hit(keywords: &[String], input: &str) -> bool {
    let normalized = input.trim().to_lowercase();
    !normalized.is_empty() && keywords.iter().any(|keyword| keyword.to_lowercase() == normalized)
}

impl CommandKeywords {
    pub fn is_confirm(&self, input: &str) -> bool {
        keyword_hit(&self.confirm, input)
    }

    pub fn is_reselect(&self, input: &str) -> bool {
        keyword_hit(&self.reselect, input)
    }

    pub fn is_restart(&self, input: &str) -> bool {
        keyword_hit(&self.restart, input)
    }

    pub fn is_resume(&self, input: &str) -> bool {
        keyword_hit(&self.resume, input)
    }

    pub fn is_end(&self, input: &str) -> bool {
        keyword_hit(&self.end, input)
    }
}

#[derive(Debug, Default, Deserialize)]
struct CommandKeywordsPatch {
    confirm: Option<Vec<String>>,
    reselect: Option<Vec<String>>,
    restart: Option<Vec<String>>,
    #[serde(rename = "continue")]
    resume: Option<Vec<String>>,
    end: Option<Vec<String>>,
}

impl CommandKeywordsPatch {
    fn apply(self, mut keywords: CommandKeywords) -> CommandKeywords {
        if let Some(confirm) = self.confirm {
            keywords.confirm = confirm;
        }
        if let Some(reselect) = self.reselect {
            keywords.reselect = reselect;
        }
        if let Some(restart) = self.restart {
            keywords.restart = restart;
        }
        if let Some(resume) = self.resume {
            keywords.resume = resume;
        }
        if let Some(end) = self.end {
            keywords.end = end;
        }
        keywords
    }
}

/// On-disk shape of one business line.
#[derive(Debug, Deserialize)]
struct RawBusinessConfig {
    business_info: BusinessInfo,
    slot_specs: Vec<SlotDefinition>,
    #[serde(default)]
    enums: BTreeMap<String, Vec<EnumOption>>,
    #[serde(default)]
    filters: Vec<OptionFilter>,
    #[serde(default)]
    collateral: Vec<CollateralRule>,
    #[serde(default)]
    weak_aliases: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    semantic_stages: BTreeMap<String, SemanticStage>,
    #[serde(default)]
    intent_recommendations: BTreeMap<String, Vec<IntentRecommendation>>,
    #[serde(default)]
    validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    templates: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    prompt_variants: BTreeMap<String, PromptVariant>,
    #[serde(default)]
    command_keywords: CommandKeywordsPatch,
}

#[derive(Debug)]
pub struct BusinessConfig {
    id: String,
    info: BusinessInfo,
    schema: Arc<FormSchema>,
    enums: BTreeMap<String, EnumTable>,
    filters: Vec<OptionFilter>,
    collateral: Vec<CollateralRule>,
    weak_aliases: BTreeMap<String, Vec<String>>,
    semantic_stages: BTreeMap<String, SemanticStage>,
    intent_recommendations: BTreeMap<String, Vec<IntentRecommendation>>,
    validation_rules: Vec<ValidationRule>,
    templates: BTreeMap<String, Vec<String>>,
    prompt_variants: BTreeMap<String, PromptVariant>,
    command_keywords: CommandKeywords,
}

impl BusinessConfig {
    pub fn from_json(id: impl Into<String>, raw: &str) -> Result<Self, BusinessConfigError> {
        let id = id.into();
        let parsed: RawBusinessConfig = serde_json::from_str(raw)
            .map_err(|source| BusinessConfigError::Parse { business: id.clone(), source })?;
        Self::from_raw(id, parsed)
    }

    fn from_raw(id: String, raw: RawBusinessConfig) -> Result<Self, BusinessConfigError> {
        let schema = FormSchema::new(raw.slot_specs)
            .map_err(|source| BusinessConfigError::Schema { business: id.clone(), source })?;
        if let Some(cycle) = schema.find_cycle() {
            warn!(
                event_name = "business.schema.cycle_detected",
                business = %id,
                cycle = %cycle.join(" -> "),
                "slot dependency cycle; prompting falls back to declaration order"
            );
        }

        let mut enums = BTreeMap::new();
        for (key, options) in &raw.enums {
            let table = EnumTable::compile(key.clone(), options).map_err(|source| {
                BusinessConfigError::Pattern { business: id.clone(), key: key.clone(), source }
            })?;
            enums.insert(key.clone(), table);
        }

        let config = Self {
            id,
            info: raw.business_info,
            schema: Arc::new(schema),
            enums,
            filters: raw.filters,
            collateral: raw.collateral,
            weak_aliases: raw.weak_aliases,
            semantic_stages: raw.semantic_stages,
            intent_recommendations: raw.intent_recommendations,
            validation_rules: raw.validation_rules,
            templates: raw.templates,
            prompt_variants: raw.prompt_variants,
            command_keywords: raw.command_keywords.apply(CommandKeywords::default()),
        };
        config.check_references()?;
        Ok(config)
    }

    fn check_references(&self) -> Result<(), BusinessConfigError> {
        let fail = |message: String| BusinessConfigError::Reference {
            business: self.id.clone(),
            message,
        };
        let require_slot = |slot: &str, context: &str| {
            if self.schema.contains(slot) {
                Ok(())
            } else {
                Err(fail(format!("{context} names undeclared slot `{slot}`")))
            }
        };

        for definition in self.schema.definitions() {
            if let Some(key) = &definition.enum_key {
                if !self.enums.contains_key(key) {
                    return Err(fail(format!(
                        "slot `{}` uses missing enum `{key}`",
                        definition.name
                    )));
                }
            }
            for stage in definition.stage_chain() {
                if !self.semantic_stages.contains_key(stage) {
                    return Err(fail(format!(
                        "slot `{}` uses missing semantic stage `{stage}`",
                        definition.name
                    )));
                }
            }
        }

        for filter in &self.filters {
            let Some(table) = self.enums.get(&filter.enum_key) else {
                return Err(fail(format!(
                    "filter `{}` targets missing enum `{}`",
                    filter.name, filter.enum_key
                )));
            };
            require_slot(&filter.by, &format!("filter `{}`", filter.name))?;
            for label in filter.allowed.values().flatten() {
                if !table.contains_label(label) {
                    return Err(fail(format!(
                        "filter `{}` allows unknown option `{label}`",
                        filter.name
                    )));
                }
            }
        }

        for rule in &self.collateral {
            require_slot(&rule.source, "collateral rule")?;
            for derivation in &rule.derive {
                require_slot(derivation.target(), "collateral derivation")?;
                if let Derivation::Lookup { lookup, .. } = derivation {
                    if self.filter(lookup).is_none() {
                        return Err(fail(format!("collateral lookup `{lookup}` is not a filter")));
                    }
                }
            }
        }

        for slot in self.weak_aliases.keys() {
            require_slot(slot, "weak_aliases")?;
        }
        for (stage_id, stage) in &self.semantic_stages {
            for slot in stage.referenced_slots() {
                require_slot(slot, &format!("semantic stage `{stage_id}`"))?;
            }
        }
        for (slot, rules) in &self.intent_recommendations {
            require_slot(slot, "intent_recommendations")?;
            if let Some(table) = self.slot_enum(slot) {
                for rule in rules {
                    if table.view().canonicalize(&rule.recommend).is_none() {
                        return Err(fail(format!(
                            "intent `{}` recommends `{}` which is not an option of `{slot}`",
                            rule.intent, rule.recommend
                        )));
                    }
                }
            }
        }
        for rule in &self.validation_rules {
            for slot in rule.when.keys() {
                require_slot(slot, &format!("validation rule `{}`", rule.name))?;
            }
        }
        for (slot, variant) in &self.prompt_variants {
            require_slot(slot, "prompt_variants")?;
            require_slot(&variant.by, "prompt_variants")?;
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &BusinessInfo {
        &self.info
    }

    pub fn display_name(&self) -> &str {
        if self.info.display_name.is_empty() {
            &self.id
        } else {
            &self.info.display_name
        }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn shared_schema(&self) -> Arc<FormSchema> {
        Arc::clone(&self.schema)
    }

    pub fn enum_table(&self, key: &str) -> Option<&EnumTable> {
        self.enums.get(key)
    }

    /// Enumeration behind `slot`, if the slot is enumerated.
    pub fn slot_enum(&self, slot: &str) -> Option<&EnumTable> {
        self.schema
            .get(slot)
            .and_then(|definition| definition.enum_key.as_deref())
            .and_then(|key| self.enums.get(key))
    }

    pub fn filters_for<'a>(&'a self, enum_key: &'a str) -> impl Iterator<Item = &'a OptionFilter> {
        self.filters.iter().filter(move |filter| filter.enum_key == enum_key)
    }

    pub fn filter(&self, name: &str) -> Option<&OptionFilter> {
        self.filters.iter().find(|filter| filter.name == name)
    }

    pub fn collateral_for<'a>(
        &'a self,
        source: &'a str,
    ) -> impl Iterator<Item = &'a CollateralRule> {
        self.collateral.iter().filter(move |rule| rule.source == source)
    }

    pub fn weak_aliases(&self, slot: &str) -> &[String] {
        self.weak_aliases.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn semantic_stage(&self, id: &str) -> Option<&SemanticStage> {
        self.semantic_stages.get(id)
    }

    pub fn intent_rules(&self, slot: &str) -> &[IntentRecommendation] {
        self.intent_recommendations.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn validation_rules(&self) -> &[ValidationRule] {
        &self.validation_rules
    }

    /// Template lines joined with newlines.
    pub fn template(&self, key: &str) -> Option<String> {
        self.templates.get(key).filter(|lines| !lines.is_empty()).map(|lines| lines.join("\n"))
    }

    pub fn prompt_variant(&self, slot: &str) -> Option<&PromptVariant> {
        self.prompt_variants.get(slot)
    }

    pub fn command_keywords(&self) -> &CommandKeywords {
        &self.command_keywords
    }
}
