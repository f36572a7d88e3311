//! Which slot to ask about next, and how to ask.

use tracing::debug;

use super::responses::{Responses, DEFAULT_SLOT_PROMPT};
use crate::business::BusinessConfig;
use crate::form::{Form, Provenance, SlotStatus, SlotValue};
use crate::matching::OptionView;

pub const AUTO_SINGLE_OPTION_CONFIDENCE: f64 = 1.0;

/// First slot of `missing` whose dependencies are all FILLED, in declaration order.
/// Falls back to the first missing slot when none is eligible.
pub fn next_slot_to_prompt(form: &Form, missing: &[String]) -> Option<String> {
    let eligible = form
        .schema()
        .definitions()
        .iter()
        .filter(|definition| missing.contains(&definition.name))
        .find(|definition| form.dependencies_met(&definition.name));
    match eligible {
        Some(definition) => Some(definition.name.clone()),
        None => {
            let fallback = missing.first().cloned();
            if let Some(slot) = &fallback {
                debug!(
                    event_name = "dialog.sequencer.fallback",
                    slot = %slot,
                    "no eligible slot; prompting first missing"
                );
            }
            fallback
        }
    }
}

/// Fills every EMPTY slot whose enumeration has exactly one option. Returns the filled names.
pub fn auto_fill_single_options(config: &BusinessConfig, form: &mut Form) -> Vec<String> {
    let mut filled = Vec::new();
    for definition in config.schema().definitions() {
        let Some(table) = config.slot_enum(&definition.name) else { continue };
        if table.len() != 1 || form.status(&definition.name) != Some(SlotStatus::Empty) {
            continue;
        }
        let Some(label) = table.view().select(1) else { continue };
        if let Some(slot) = form.get_mut(&definition.name) {
            slot.assign(SlotValue::new(
                label,
                AUTO_SINGLE_OPTION_CONFIDENCE,
                Provenance::AutoSingleOption,
                "业务线唯一可选项",
            ));
            filled.push(definition.name.clone());
        }
    }
    filled
}

/// Options of `slot` narrowed by the first filter whose upstream slot has a listed value.
/// `None` for free-text slots.
pub fn filtered_options<'a>(
    config: &'a BusinessConfig,
    form: &Form,
    slot: &str,
) -> Option<OptionView<'a>> {
    let table = config.slot_enum(slot)?;
    for filter in config.filters_for(table.key()) {
        let Some(upstream) = form.value_of(&filter.by) else { continue };
        if let Some(allowed) = filter.allowed_for(upstream) {
            return Some(table.restricted(allowed));
        }
    }
    Some(table.view())
}

/// Prompt text for `slot`, with its numbered options appended unless the template numbers them.
pub fn slot_prompt(config: &BusinessConfig, form: &Form, slot: &str) -> String {
    let responses = Responses::new(config);
    let variant_key = config.prompt_variant(slot).and_then(|variant| {
        let upstream = form.value_of(&variant.by)?;
        variant.templates.get(upstream).cloned()
    });
    let template = variant_key
        .and_then(|key| responses.configured(&key))
        .or_else(|| responses.configured(&format!("form_{slot}_prompt")));

    let mut text = template.unwrap_or_else(|| {
        let description = responses.slot_description(slot);
        responses.render(DEFAULT_SLOT_PROMPT, &[("slot_desc", description.as_str())])
    });

    if let Some(view) = filtered_options(config, form, slot) {
        if !text.contains("1.") {
            for (index, label) in view.labels().into_iter().enumerate() {
                text.push_str(&format!("\n{}. {}", index + 1, label));
            }
        }
    }
    text
}
