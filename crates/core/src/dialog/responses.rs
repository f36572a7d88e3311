//! Template lookup with built-in fallbacks. Only `{placeholder}` substitution, no generation.

use crate::business::BusinessConfig;
use crate::form::{Form, Provenance};

pub const WELCOME: &str = "form_welcome";
pub const INFO_RECORDED: &str = "form_info_recorded";
pub const CONFLICT_INTRO: &str = "form_conflict_intro";
pub const CONFLICT_EXISTING: &str = "form_conflict_existing";
pub const CONFLICT_NEW: &str = "form_conflict_new";
pub const CONFLICT_OPTIONS: &str = "form_conflict_options";
pub const CONFLICT_INVALID_CHOICE: &str = "form_conflict_invalid_choice";
pub const INVALID_OPTION: &str = "form_invalid_option";
pub const AMBIGUOUS_MATCH: &str = "form_ambiguous_match";
pub const CONTINUE_FILLING: &str = "form_continue_filling";
pub const VALIDATION_ERROR_TITLE: &str = "form_validation_error_title";
pub const VALIDATION_ERROR_FOOTER: &str = "form_validation_error_footer";
pub const ORDER_SUMMARY_TITLE: &str = "form_order_summary_title";
pub const CONFIRMATION_OPTIONS: &str = "form_confirmation_options";
pub const RESELECT_TITLE: &str = "form_reselect_title";
pub const RESELECT_FOOTER: &str = "form_reselect_footer";
pub const RESELECT_PROMPT_PREFIX: &str = "form_reselect_prompt_prefix";
pub const ORDER_CONFIRMED: &str = "form_order_confirmed";
pub const ORDER_THANKS: &str = "form_order_thanks";
pub const GOODBYE: &str = "form_goodbye";
pub const CONTINUE_PROMPT: &str = "form_continue_prompt";
pub const INFO_INCOMPLETE: &str = "form_info_incomplete";
pub const RESTART: &str = "form_restart";
pub const RESUME: &str = "form_resume";
pub const DEFAULT_SLOT_PROMPT: &str = "form_default_slot_prompt";

const SUMMARY_RULE_WIDTH: usize = 30;

fn fallback(key: &str) -> Option<&'static str> {
    let text = match key {
        INFO_RECORDED => "✅ 好的，我记下啦：",
        CONFLICT_INTRO => "🤔 关于 {slot_desc} 我看到两个可能：",
        CONFLICT_EXISTING => "   现有：{old_value}（{old_source}）",
        CONFLICT_NEW => "   新识别：{new_value}（{new_source}）",
        CONFLICT_OPTIONS => "输入 1 保留现有 | 2 用新识别 | 3 我再说一次",
        CONFLICT_INVALID_CHOICE => "请输入 1 保留原值 | 2 使用新值 | 3 重新说明",
        INVALID_OPTION => "无该选项，请输入有效序号或重新描述。",
        AMBIGUOUS_MATCH => "⚠️ 检测到多个可能匹配: {matches}\n请更具体描述或输入序号选择。",
        CONTINUE_FILLING => "我们继续完善其它信息吧～",
        VALIDATION_ERROR_TITLE => "😮 某些组合暂时不太合适：",
        VALIDATION_ERROR_FOOTER => "可以调整相关项后再试一下～",
        ORDER_SUMMARY_TITLE => "📝 您的订单信息：",
        CONFIRMATION_OPTIONS => {
            "💬 请选择您的操作：\n1️⃣ 确认 - 确认订单并提交\n2️⃣ 重选 - 修改某个选项\n3️⃣ 继续购物 - 重新开始选择\n\n💬 可以直接输入序号或关键词（如：确认/重选/继续购物）"
        }
        RESELECT_TITLE => "🔄 请选择要修改的项目：",
        RESELECT_FOOTER => "💬 请输入要修改的项目序号",
        RESELECT_PROMPT_PREFIX => "好的，请重新选择{slot_desc}：",
        ORDER_CONFIRMED => "✅ 订单已确认！",
        ORDER_THANKS => "想继续看看其他产品吗？(输入'继续' / 输入'结束')",
        GOODBYE => "👋 感谢光临，期待下次为您服务！",
        CONTINUE_PROMPT => "想继续看看其他产品吗？(输入'是'或'继续' / 输入'再见'结束)",
        INFO_INCOMPLETE => "信息尚未完整，还需要：{missing}",
        RESTART => "好的！让我们重新开始选择～",
        RESUME => "🎉 好的，我们重新开始选择～",
        DEFAULT_SLOT_PROMPT => "请告诉我{slot_desc}：",
        _ => return None,
    };
    Some(text)
}

/// Replaces each `{name}` with its value; unknown placeholders stay as written.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

pub fn source_description(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::DirectAlias => "关键词直接匹配",
        Provenance::NumericSelection => "用户数字选择",
        Provenance::Semantic => "语义智能映射",
        Provenance::ModelSingle => "AI智能分析",
        Provenance::ModelMulti => "AI多维度识别",
        Provenance::UniqueMatch => "唯一关键词匹配",
        Provenance::IntentRecommendation => "智能意图推荐",
        Provenance::FreeText => "用户输入",
        Provenance::AutoSingleOption => "唯一可选项",
    }
}

/// Response texts for one business line.
#[derive(Clone, Copy)]
pub struct Responses<'a> {
    config: &'a BusinessConfig,
}

impl<'a> Responses<'a> {
    pub fn new(config: &'a BusinessConfig) -> Self {
        Self { config }
    }

    /// Configured template only.
    pub fn configured(&self, key: &str) -> Option<String> {
        self.config.template(key)
    }

    pub fn text(&self, key: &str) -> String {
        self.configured(key)
            .or_else(|| fallback(key).map(str::to_string))
            .unwrap_or_default()
    }

    pub fn render(&self, key: &str, values: &[(&str, &str)]) -> String {
        render(&self.text(key), values)
    }

    pub fn slot_description(&self, slot: &str) -> String {
        self.config
            .schema()
            .get(slot)
            .map(|definition| definition.display_name().to_string())
            .unwrap_or_else(|| slot.to_string())
    }

    /// Summary block listing required slots (pending ones marked) and filled optional ones.
    pub fn summary(&self, form: &Form) -> String {
        let rule = "=".repeat(SUMMARY_RULE_WIDTH);
        let mut lines = vec![self.text(ORDER_SUMMARY_TITLE), rule.clone()];
        for slot in form.slots() {
            let description = slot.definition.display_name();
            match (slot.is_filled(), slot.current_value()) {
                (true, Some(value)) => lines.push(format!("• {description}: {value}")),
                _ if slot.definition.required => lines.push(format!("• {description}: 待填写")),
                _ => {}
            }
        }
        lines.push(rule);
        lines.join("\n")
    }

    /// "recorded" header followed by one line per updated slot.
    pub fn recorded(&self, form: &Form, updated: &[String]) -> Option<String> {
        let lines: Vec<String> = updated
            .iter()
            .filter_map(|name| {
                let slot = form.get(name)?;
                let value = slot.value.as_ref()?;
                Some(format!(
                    "   {}{}: {}",
                    value.provenance.display_prefix(),
                    slot.definition.display_name(),
                    value.value
                ))
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(format!("{}\n{}", self.text(INFO_RECORDED), lines.join("\n")))
    }

    pub fn reselect_menu(&self, form: &Form, slots: &[String]) -> String {
        let mut lines = vec![self.text(RESELECT_TITLE)];
        for (index, name) in slots.iter().enumerate() {
            let value = form.value_of(name).unwrap_or_default();
            lines.push(format!("{}. {}: {}", index + 1, self.slot_description(name), value));
        }
        lines.push(String::new());
        lines.push(self.text(RESELECT_FOOTER));
        lines.join("\n")
    }

    pub fn validation_failure(&self, messages: &[String]) -> String {
        let mut lines = vec![self.text(VALIDATION_ERROR_TITLE)];
        lines.extend(messages.iter().map(|message| format!("- {message}")));
        lines.push(self.text(VALIDATION_ERROR_FOOTER));
        lines.join("\n")
    }
}
