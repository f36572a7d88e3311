use std::path::PathBuf;
use std::sync::Arc;

use slotform_core::dialog::ReselectStage;
use slotform_core::{
    BusinessCatalog, DialogEngine, InMemoryAuditSink, LifecycleState, ModelError, ModelSlot,
    Provenance, ScriptedModelClient, SlotStatus, TurnResult,
};

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/businesses")
}

fn engine(line: &str) -> DialogEngine {
    let catalog = BusinessCatalog::load_dir(&config_dir()).expect("shipped business configs load");
    let config = catalog.get(line).expect("business line exists");
    DialogEngine::new(config).with_session_id("scenario")
}

fn apple_with_model(model: &Arc<ScriptedModelClient>) -> DialogEngine {
    engine("apple_store").with_model(Box::new(Arc::clone(model)))
}

fn provenance_of(engine: &DialogEngine, slot: &str) -> Option<Provenance> {
    engine.state().form.get(slot).and_then(|slot| slot.value.as_ref()).map(|value| value.provenance)
}

/// Drives an apple_store session to READY_CONFIRM with a validated laptop order.
fn ready_laptop(engine: &mut DialogEngine) -> TurnResult {
    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");
    engine.process_turn("2")
}

#[test]
fn scenario_a_single_category_word_fills_category_directly() {
    let mut engine = engine("apple_store");

    let turn = engine.process_turn("电脑");

    assert_eq!(turn.slots_filled, vec!["category"]);
    assert_eq!(engine.state().form.status("category"), Some(SlotStatus::Filled));
    assert_eq!(engine.state().form.value_of("category"), Some("电脑"));
    assert_eq!(provenance_of(&engine, "category"), Some(Provenance::DirectAlias));
    assert_eq!(engine.state().form.value_of("brand"), Some("苹果"), "single-option slot auto-filled");
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("series"));
    assert!(turn.response.contains("(直接) 产品类别: 电脑"));
    assert!(turn.response.contains("💻 请选择电脑系列："));
    assert!(turn.response.contains("1. MacBook Air"));
    assert!(!turn.response.contains("iPhone"));
}

#[test]
fn scenario_b_intent_recommendations_fill_chip_and_storage() {
    let mut engine = engine("apple_store");

    let first = engine.process_turn("MacBook Pro");
    assert_eq!(first.slots_filled, vec!["category", "series"]);
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("chip"));

    let turn = engine.process_turn("我要做视频剪辑");

    assert_eq!(turn.slots_filled, vec!["chip", "storage"]);
    assert_eq!(engine.state().form.value_of("chip"), Some("M3 Pro"));
    assert_eq!(engine.state().form.value_of("storage"), Some("1TB"));
    assert_eq!(provenance_of(&engine, "chip"), Some(Provenance::IntentRecommendation));
    assert_eq!(provenance_of(&engine, "storage"), Some(Provenance::IntentRecommendation));
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("color"));
    assert!(!turn.form_complete);
}

#[test]
fn scenario_c_model_conflict_resolved_with_the_new_value() {
    let model = Arc::new(
        ScriptedModelClient::new()
            .reply(&[])
            .reply(&[("color", ModelSlot::new("深空灰", 0.8))])
            .reply(&[("color", ModelSlot::new("银色", 0.8))]),
    );
    let mut engine = apple_with_model(&model);

    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");
    let ready = engine.process_turn("来个低调点的配色");
    assert_eq!(provenance_of(&engine, "color"), Some(Provenance::ModelSingle));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert!(ready.form_complete);
    assert_eq!(model.requests()[1].target_slots, vec!["size", "color"]);

    let conflict = engine.process_turn("换成银色");
    assert_eq!(conflict.conflicts.len(), 1);
    assert_eq!(conflict.conflicts[0].slot, "color");
    assert_eq!(conflict.conflicts[0].candidate.value, "银色");
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Conflicted));
    assert_eq!(engine.state().form.value_of("color"), Some("深空灰"));
    assert_eq!(engine.state().awaiting_conflict.as_deref(), Some("color"));
    assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
    assert!(conflict.response.contains("🤔 关于 颜色 我看到两个可能："));
    assert!(conflict.response.contains("现有：深空灰（AI智能分析）"));
    assert!(conflict.response.contains("新识别：银色（AI智能分析）"));

    let chatter = engine.process_turn("嗯让我想想");
    assert!(chatter.response.contains("输入 1 保留现有 | 2 用新识别 | 3 我再说一次"));
    let invalid = engine.process_turn("7");
    assert_eq!(invalid.response, "请输入 1 保留原值 | 2 使用新值 | 3 重新说明");
    assert_eq!(engine.state().awaiting_conflict.as_deref(), Some("color"));

    let resolved = engine.process_turn("2");

    assert_eq!(resolved.slots_updated, vec!["color"]);
    assert_eq!(engine.state().form.value_of("color"), Some("银色"));
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Filled));
    assert!(engine.state().awaiting_conflict.is_none());
    assert!(engine.state().form.get("color").is_some_and(|slot| slot.candidates.is_empty()));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert!(resolved.response.contains("• 颜色: 银色"));
}

#[test]
fn scenario_d_confirm_then_end_signals_exit() {
    let sink = Arc::new(InMemoryAuditSink::default());
    let mut engine = engine("apple_store").with_audit_sink(sink.clone());

    let ready = ready_laptop(&mut engine);
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert!(ready.form_complete);
    assert!(ready.response.contains("📝 您的订单信息："));
    assert!(ready.response.contains("• 芯片: M3 Pro"));
    assert!(ready.response.contains("1️⃣ 确认"));
    assert!(ready.response.contains("2️⃣ 重选"));
    assert!(ready.response.contains("3️⃣ 继续购物"));

    let confirmed = engine.process_turn("1");
    assert_eq!(engine.state().lifecycle, LifecycleState::AwaitingContinue);
    assert!(confirmed.response.starts_with("✅ 订单已确认！"));
    assert!(confirmed.response.contains("  • 颜色: 银色"));
    assert!(confirmed.response.contains("感谢您的选购！"));
    let order = engine.confirmed_order().expect("snapshot stored");
    assert_eq!(order.get("series").map(String::as_str), Some("MacBook Pro"));

    let other = engine.process_turn("随便聊聊");
    assert!(!other.should_exit);
    assert!(other.response.contains("想继续看看其他产品吗"));
    assert_eq!(engine.state().lifecycle, LifecycleState::AwaitingContinue);

    let end = engine.process_turn("end");
    assert!(end.should_exit);
    assert!(end.response.contains("感谢光临"));

    let events = sink.event_types();
    assert!(events.iter().any(|event| event == "order.confirmed"));
    assert!(events.iter().any(|event| event == "lifecycle.transition_applied"));
}

#[test]
fn continue_after_confirmation_starts_a_fresh_order() {
    let mut engine = engine("apple_store");
    ready_laptop(&mut engine);
    engine.process_turn("确认");

    let resumed = engine.process_turn("继续");

    assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
    assert!(engine.confirmed_order().is_none());
    assert_eq!(engine.state().form.value_of("series"), None);
    assert_eq!(engine.state().form.value_of("brand"), Some("苹果"), "auto-fill reruns after reset");
    assert!(resumed.response.starts_with("🎉 好的，我们重新开始选择～"));
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("category"));
}

#[test]
fn restart_from_the_menu_clears_the_form() {
    let mut engine = engine("apple_store");
    ready_laptop(&mut engine);

    let restarted = engine.process_turn("3");

    assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
    assert!(restarted.response.starts_with("好的！让我们重新开始选择～"));
    assert_eq!(engine.state().form.missing_required(), vec!["category", "series", "chip", "storage", "color"]);
}

#[test]
fn ambiguous_reply_to_a_prompt_writes_nothing() {
    let mut engine = engine("apple_store");
    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");

    let turn = engine.process_turn("灰色还是银色");

    assert!(turn.slots_updated.is_empty());
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Empty));
    assert!(turn.response.starts_with("⚠️ 检测到多个可能匹配"));
    assert!(turn.response.contains("深空灰"));
    assert!(turn.response.contains("银色"));
}

#[test]
fn numeric_selection_accepts_exactly_the_listed_range() {
    let mut engine = engine("apple_store");
    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");

    for rejected in ["0", "-1", "5"] {
        let turn = engine.process_turn(rejected);
        assert_eq!(turn.response, "无该选项，请输入有效序号或重新描述。", "input {rejected}");
        assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Empty));
    }

    engine.process_turn("4");
    assert_eq!(engine.state().form.value_of("color"), Some("星光色"));
    assert_eq!(provenance_of(&engine, "color"), Some(Provenance::NumericSelection));
}

#[test]
fn reselect_clears_the_slot_and_its_dependents() {
    let mut engine = engine("apple_store");
    ready_laptop(&mut engine);

    let menu = engine.process_turn("重选");
    assert_eq!(engine.state().lifecycle, LifecycleState::Reselecting);
    assert!(menu.response.contains("3. 产品系列: MacBook Pro"));

    let picked = engine.process_turn("3");
    for slot in ["series", "chip", "storage", "color"] {
        assert_eq!(engine.state().form.status(slot), Some(SlotStatus::Empty), "{slot} cleared");
    }
    assert_eq!(engine.state().form.value_of("category"), Some("电脑"));
    assert!(picked.response.starts_with("好的，请重新选择产品系列："));
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("series"));

    let refilled = engine.process_turn("macbook air");
    assert_eq!(engine.state().form.value_of("series"), Some("MacBook Air"));
    assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
    assert_eq!(engine.state().reselect, ReselectStage::Idle);
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("chip"));
    assert!(refilled.response.contains("请选择芯片："));
}

#[test]
fn validation_failure_blocks_confirmation_until_a_slot_changes() {
    let mut engine = engine("apple_store");
    engine.process_turn("MacBook Pro");
    engine.process_turn("1");
    engine.process_turn("2");

    let failed = engine.process_turn("1");

    assert_eq!(engine.state().form.value_of("chip"), Some("M3"));
    assert_eq!(engine.state().form.value_of("storage"), Some("1TB"));
    assert_ne!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert_eq!(engine.state().lifecycle, LifecycleState::Reselecting);
    assert_eq!(engine.state().validation_errors.len(), 1);
    let recorded = failed.response.find("✅ 好的，我记下啦：").expect("color acknowledged");
    let title = failed.response.find("😮 某些组合暂时不太合适：").expect("validation title");
    assert!(recorded < title, "acknowledgement precedes the validation report");
    assert!(failed.response.contains("(序号) 颜色: 深空灰"));
    assert!(failed.response.contains("- 标准 M3 芯片不支持 1TB 及以上存储"));
    assert!(failed.response.contains("🔄 请选择要修改的项目："));

    engine.process_turn("4");
    assert!(engine.state().validation_errors.is_empty());
    assert_eq!(engine.state().form.status("chip"), Some(SlotStatus::Empty));

    let fixed = engine.process_turn("2");

    assert_eq!(engine.state().form.value_of("chip"), Some("M3 Pro"));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert!(fixed.response.contains("📝 您的订单信息："));
}

#[test]
fn phone_order_uses_phone_series_storage_and_colors() {
    let mut engine = engine("apple_store");

    let first = engine.process_turn("我想买个手机");
    assert_eq!(first.slots_filled, vec!["category"]);
    assert!(first.response.contains("📱 请选择手机系列：\n1. iPhone 16 Pro\n2. iPhone 16\n3. iPhone 15"));

    let series = engine.process_turn("要旗舰专业的，拍照摄影顶配");
    assert_eq!(series.slots_filled, vec!["series"]);
    assert_eq!(engine.state().form.value_of("series"), Some("iPhone 16 Pro"));
    assert_eq!(provenance_of(&engine, "series"), Some(Provenance::Semantic));
    assert!(series.response.contains("请选择芯片：\n1. A18 Pro\n2. A18"));

    let chip = engine.process_turn("1");
    assert_eq!(engine.state().form.value_of("chip"), Some("A18 Pro"));
    assert!(chip.response.contains("请选择存储容量：\n1. 256GB\n2. 512GB\n3. 1TB"));
    assert!(!chip.response.contains("128GB"));

    let storage = engine.process_turn("入门基础款，容量较小的就行");
    assert_eq!(engine.state().form.value_of("storage"), Some("256GB"));
    assert_eq!(provenance_of(&engine, "storage"), Some(Provenance::Semantic));
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("color"));
    assert!(storage.response.contains("请选择颜色：\n1. 黑色\n2. 白色\n3. 蓝色\n4. 自然钛"));
    assert!(!storage.response.contains("深空灰"));

    let color = engine.process_turn("要钛合金的，自然一点");

    assert_eq!(engine.state().form.value_of("color"), Some("自然钛"));
    assert_eq!(provenance_of(&engine, "color"), Some(Provenance::Semantic));
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Filled));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert!(color.response.contains("• 颜色: 自然钛"));
}

#[test]
fn weak_model_value_stays_partial_until_the_user_picks() {
    let model = Arc::new(
        ScriptedModelClient::new().reply(&[]).reply(&[("color", ModelSlot::new("深空灰", 0.5))]),
    );
    let mut engine = apple_with_model(&model);
    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");

    let guessed = engine.process_turn("看着办吧");

    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Partial));
    assert_eq!(engine.state().form.value_of("color"), Some("深空灰"));
    assert_eq!(provenance_of(&engine, "color"), Some(Provenance::ModelSingle));
    assert!(guessed.slots_filled.is_empty());
    assert!(!guessed.form_complete);
    assert!(engine.state().form.missing_required().contains(&"color".to_string()));
    assert_eq!(engine.state().last_prompted_slot.as_deref(), Some("color"));
    assert_eq!(engine.state().lifecycle, LifecycleState::Collecting);
    assert!(guessed.response.contains("请选择颜色：\n1. 深空灰\n2. 银色"));

    let picked = engine.process_turn("2");

    assert_eq!(picked.slots_filled, vec!["color"]);
    assert!(picked.conflicts.is_empty());
    assert_eq!(engine.state().form.value_of("color"), Some("银色"));
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Filled));
    assert_eq!(provenance_of(&engine, "color"), Some(Provenance::NumericSelection));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
    assert_eq!(model.requests().len(), 2, "numeric replies never reach the model");
}

#[test]
fn model_never_overrides_an_explicit_choice() {
    let model = Arc::new(
        ScriptedModelClient::new()
            .reply(&[])
            .reply(&[("color", ModelSlot::new("银色", 0.95))]),
    );
    let mut engine = apple_with_model(&model);
    engine.process_turn("MacBook Pro");
    engine.process_turn("我要做视频剪辑");
    engine.process_turn("1");
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);

    let turn = engine.process_turn("换成银色");

    assert!(turn.conflicts.is_empty());
    assert_eq!(engine.state().form.value_of("color"), Some("深空灰"));
    assert_eq!(engine.state().lifecycle, LifecycleState::ReadyConfirm);
}

#[test]
fn model_failures_and_weak_results_are_absorbed() {
    let sink = Arc::new(InMemoryAuditSink::default());
    let model = Arc::new(
        ScriptedModelClient::new()
            .fail(ModelError::Timeout(20))
            .reply(&[("color", ModelSlot::new("银色", 0.3)), ("warranty", ModelSlot::new("3年", 0.9))]),
    );
    let mut engine = apple_with_model(&model).with_audit_sink(sink.clone());
    engine.process_turn("MacBook Pro");

    let degraded = engine.process_turn("我要做视频剪辑");
    assert_eq!(degraded.slots_filled, vec!["chip", "storage"]);
    assert!(!degraded.response.contains("timed out"));
    assert!(sink.event_types().iter().any(|event| event == "extraction.model_failed"));

    let weak = engine.process_turn("来个低调点的配色");
    assert!(weak.slots_updated.is_empty());
    assert_eq!(engine.state().form.status("color"), Some(SlotStatus::Empty));
    assert_eq!(model.requests().len(), 2);
}

#[test]
fn prompted_free_text_slot_takes_the_reply_verbatim() {
    let mut engine = engine("dining");
    engine.initial_prompt();
    engine.process_turn("海底捞");

    let turn = engine.process_turn("晚上约会");

    assert_eq!(engine.state().form.value_of("series"), Some("晚餐时段"));
    assert_eq!(turn.slots_updated, vec!["series"]);
    assert_eq!(engine.state().form.status("party_size"), Some(SlotStatus::Empty));

    engine.process_turn("两个人约会");
    assert_eq!(engine.state().form.value_of("party_size"), Some("两个人约会"));
}
