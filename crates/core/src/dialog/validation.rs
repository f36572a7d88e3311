use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::business::{BusinessConfig, ValidationRule};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("validator `{validator}` faulted: {message}")]
pub struct ValidatorFault {
    pub validator: String,
    pub message: String,
}

/// A pure check over the filled-value snapshot.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    /// Violation messages, empty when the combination is acceptable.
    fn check(&self, values: &BTreeMap<String, String>) -> Result<Vec<String>, ValidatorFault>;
}

/// A configured rule that fires its message when every condition holds.
#[derive(Clone, Debug)]
pub struct ExclusionRule {
    rule: ValidationRule,
}

impl ExclusionRule {
    pub fn new(rule: ValidationRule) -> Self {
        Self { rule }
    }
}

impl Validator for ExclusionRule {
    fn name(&self) -> &str {
        &self.rule.name
    }

    fn check(&self, values: &BTreeMap<String, String>) -> Result<Vec<String>, ValidatorFault> {
        if self.rule.when.is_empty() {
            return Err(ValidatorFault {
                validator: self.rule.name.clone(),
                message: "rule has no conditions".to_string(),
            });
        }
        let fires = self
            .rule
            .when
            .iter()
            .all(|(slot, condition)| values.get(slot).is_some_and(|value| condition.holds(value)));
        Ok(if fires { vec![self.rule.message.clone()] } else { Vec::new() })
    }
}

/// Ordered validators; a faulting one is logged and skipped.
#[derive(Default)]
pub struct ValidatorSet {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorSet {
    pub fn from_config(config: &BusinessConfig) -> Self {
        let validators = config
            .validation_rules()
            .iter()
            .cloned()
            .map(|rule| Box::new(ExclusionRule::new(rule)) as Box<dyn Validator>)
            .collect();
        Self { validators }
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn run(&self, values: &BTreeMap<String, String>) -> Vec<String> {
        let mut messages = Vec::new();
        for validator in &self.validators {
            match validator.check(values) {
                Ok(found) => messages.extend(found),
                Err(fault) => warn!(
                    event_name = "validation.rule.faulted",
                    validator = %fault.validator,
                    error = %fault,
                    "validator skipped"
                ),
            }
        }
        messages
    }
}
