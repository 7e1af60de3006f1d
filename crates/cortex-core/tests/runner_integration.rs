//! Runner integration: compiled episodes driven through scripted layers.

use cortex_core::layer::{LayerPool, ScriptedLayer};
use cortex_core::runner::{CancelToken, EpisodeRunner};
use cortex_core::template::{canonical, compile, CompilationContext};
use cortex_core::testing;
use cortex_core::vocabulary::{
    DecisionOutcome, FsmState, LayerId, QualityTier, StakesLevel, TaskResultStatus, TemplateId,
    ToolSafetyClass, ToolsState,
};

fn make_context(
    correlation_id: &str,
    stakes: StakesLevel,
    tier: QualityTier,
    tools_state: ToolsState,
) -> CompilationContext {
    CompilationContext::new("runner integration", stakes, tier, tools_state, testing::t0())
        .with_correlation_id(correlation_id)
}

#[test]
fn test_read_only_act_episode_completes() {
    let corr = "corr_run_c";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Par, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    let directive = testing::directive_builder(corr, "task_c").build(testing::at(1));
    let result_packet = testing::task_result(
        corr,
        "task_c",
        &directive.header.packet_id,
        TaskResultStatus::Success,
        testing::at(2),
    );

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr).build(testing::t0())],
            vec![directive],
        ],
    )));
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [
            vec![result_packet],
            vec![testing::belief_update(corr, testing::at(3))],
        ],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    assert!(result.success, "failed: {:?}", result.diagnostics);
    assert_eq!(result.steps.len(), 4);
    assert_eq!(result.final_state, FsmState::S7Review);
    assert!(result.snapshot.frozen);
    assert_eq!(result.snapshot.packet_count(), 4);
    assert!(result.snapshot.open_directives.is_empty());
}

#[test]
fn test_write_act_episode_with_token() {
    let corr = "corr_run_d";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Superb, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::D), &context).unwrap();

    let directive = testing::directive_builder(corr, "task_d")
        .safety(ToolSafetyClass::Write)
        .tool("market_api", "write")
        .token("token_d")
        .build(testing::at(2));
    let result_packet = testing::task_result(
        corr,
        "task_d",
        &directive.header.packet_id,
        TaskResultStatus::Success,
        testing::at(3),
    );

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr).build(testing::t0())],
            vec![testing::token_builder(corr, "token_d").build(testing::at(1))],
            vec![directive],
        ],
    )));
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [
            vec![result_packet],
            vec![testing::observation(corr, testing::at(4))],
            vec![testing::belief_update(corr, testing::at(5))],
        ],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    assert!(result.success, "failed: {:?}", result.diagnostics);
    assert_eq!(result.final_state, FsmState::S7Review);
    let token = result.snapshot.active_tokens.get("token_d").unwrap();
    assert_eq!(token.usage_count, 1);
}

#[test]
fn test_degraded_template_takes_guarded_branch() {
    let corr = "corr_run_f";
    let context = make_context(
        corr,
        StakesLevel::Medium,
        QualityTier::Par,
        ToolsState::ToolsPartial,
    );
    let episode = compile(&canonical::template(TemplateId::F), &context).unwrap();

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [
            vec![testing::observation(corr, testing::t0())],
            vec![testing::belief_update(corr, testing::at(1))],
        ],
    )));
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr)
                .outcome(DecisionOutcome::Escalate)
                .tools_state(ToolsState::ToolsPartial)
                .build(testing::at(2))],
            vec![testing::escalation_builder(corr).build(testing::at(3))],
        ],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    assert!(result.success, "failed: {:?}", result.diagnostics);
    assert_eq!(result.final_state, FsmState::S8Escalated);
    // The guard routed past the hold branch to the escalation exit.
    let executed: Vec<&str> = result.steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(
        executed,
        ["sense_degraded", "model_degraded", "assess", "escalate_or_wait"]
    );
}

#[test]
fn test_layer_contract_violation_fails_step() {
    let corr = "corr_run_violation";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Par, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    let directive = testing::directive_builder(corr, "task_v").build(testing::at(1));
    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr).build(testing::t0())],
            vec![directive],
        ],
    )));
    // Task prosecution may not emit decisions.
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [vec![testing::decision_builder(corr).build(testing::at(2))]],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    assert!(!result.success);
    assert_eq!(result.failed_step.as_deref(), Some("collect"));
    let failed = result.steps.last().unwrap();
    assert!(failed.error.as_deref().unwrap().contains("contract"));
}

#[test]
fn test_validation_failure_aborts_episode_with_diagnostics() {
    let corr = "corr_run_invalid";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Par, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    let mut pool = LayerPool::new();
    // SUBPAR ACT: rejected by the invariant gate.
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [vec![testing::decision_builder(corr)
            .tier(QualityTier::Subpar)
            .build(testing::t0())]],
    )));
    pool.register(Box::new(ScriptedLayer::new(LayerId::TaskProsecution)));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    assert!(!result.success);
    assert_eq!(result.failed_step.as_deref(), Some("decide_act"));
    assert!(!result.diagnostics.is_empty());
}

#[test]
fn test_budget_exhaustion_routes_to_escalation() {
    let corr = "corr_run_budget";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Superb, ToolsState::ToolsOk)
        .with_budgets(2000, 1, 300);
    let episode = compile(&canonical::template(TemplateId::G), &context).unwrap();

    let write = testing::directive_builder(corr, "task_g1")
        .safety(ToolSafetyClass::Write)
        .tool("journal", "write")
        .token("token_g")
        .build(testing::at(2));
    let write_result = testing::task_result(
        corr,
        "task_g1",
        &write.header.packet_id,
        TaskResultStatus::Success,
        testing::at(3),
    );
    let gate = testing::directive_builder(corr, "task_g2").build(testing::at(4));
    let gate_result = testing::task_result(
        corr,
        "task_g2",
        &gate.header.packet_id,
        TaskResultStatus::Success,
        testing::at(5),
    );

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr).build(testing::t0())],
            vec![testing::token_builder(corr, "token_g")
                .scope(&["journal"], &["write"])
                .max_uses(2)
                .build(testing::at(1))],
            vec![write],
            vec![gate],
        ],
    )));
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [vec![write_result], vec![gate_result]],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    // Two results against a tool-call budget of one: the runner refuses
    // the final step and hands off.
    assert!(!result.success);
    assert_eq!(result.final_state, FsmState::S8Escalated);
    assert!(result.snapshot.overrun_addressed);
    assert_eq!(result.failed_step.as_deref(), Some("integrate"));
}

#[test]
fn test_directive_timeout_synthesizes_escalation_at_high_stakes() {
    let corr = "corr_run_timeout";
    let context = make_context(corr, StakesLevel::High, QualityTier::Superb, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    let directive = testing::directive_builder(corr, "task_slow")
        .timeout(60)
        .stakes(StakesLevel::High)
        .tier(QualityTier::Superb)
        .build(testing::at(1));

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::CognitiveControl,
        [
            vec![testing::decision_builder(corr)
                .stakes(StakesLevel::High)
                .tier(QualityTier::Superb)
                .load_bearing("deadline honored", true)
                .build(testing::t0())],
            vec![directive],
        ],
    )));
    // Instead of a result, late telemetry arrives after the deadline.
    pool.register(Box::new(ScriptedLayer::with_batches(
        LayerId::TaskProsecution,
        [vec![testing::observation(corr, testing::at(120))]],
    )));

    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    // The timeout fired at HIGH stakes, so an escalation was synthesized
    // and the episode ended escalated rather than completing review.
    assert!(!result.success);
    assert_eq!(result.final_state, FsmState::S8Escalated);
    assert!(result
        .snapshot
        .open_directives
        .values()
        .any(|d| d.timed_out));
}

#[test]
fn test_cancellation_between_steps() {
    let corr = "corr_run_cancel";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Par, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    let mut pool = LayerPool::new();
    pool.register(Box::new(ScriptedLayer::new(LayerId::CognitiveControl)));
    pool.register(Box::new(ScriptedLayer::new(LayerId::TaskProsecution)));

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run_cancellable(&episode, Vec::new(), &cancel);

    assert!(!result.success);
    assert!(result.steps.is_empty());
    assert_eq!(result.failed_step.as_deref(), Some("decide_act"));
}

#[test]
fn test_missing_layer_fails_step() {
    let corr = "corr_run_missing";
    let context = make_context(corr, StakesLevel::Medium, QualityTier::Par, ToolsState::ToolsOk);
    let episode = compile(&canonical::template(TemplateId::C), &context).unwrap();

    // No layers registered at all.
    let mut runner = EpisodeRunner::new(LayerPool::new());
    let result = runner.run(&episode, Vec::new());

    assert!(!result.success);
    let failed = result.steps.first().unwrap();
    assert!(failed.error.as_deref().unwrap().contains("not registered"));
}
