//! End-to-end protocol scenarios driven through the episode ledger.
//!
//! Each scenario exercises the full three-gate admission path: schema,
//! state machine, and cross-policy invariants, with the ledger as the
//! single source of episode state.

use cortex_core::ledger::{EpisodeLedger, LedgerError, LedgerEvent};
use cortex_core::testing;
use cortex_core::validation::fsm::{self, EpisodeSignal};
use cortex_core::validation::{DiagnosticCode, InvariantCode};
use cortex_core::vocabulary::{
    DecisionOutcome, FsmState, QualityTier, StakesLevel, TaskResultStatus, ToolSafetyClass,
    ToolsState, UncertaintyLevel,
};

fn make_ledger(correlation_id: &str, initial_state: FsmState) -> EpisodeLedger {
    let envelope = testing::EnvelopeBuilder::new().build();
    EpisodeLedger::create(correlation_id, &envelope.budgets, initial_state)
}

fn rejection_codes(error: &LedgerError) -> Vec<InvariantCode> {
    match error {
        LedgerError::PacketRejected { report } => report
            .diagnostics
            .iter()
            .filter_map(|d| match d.code {
                DiagnosticCode::Invariant(code) => Some(code),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// S1: the full verification loop at MEDIUM stakes with HIGH uncertainty.
#[test]
fn scenario_verification_loop() {
    let corr = "corr_test_1";
    let mut ledger = make_ledger(corr, FsmState::S0Idle);

    // Stale cached observation starts the episode.
    ledger
        .apply(&testing::cached_observation(corr, testing::t0()))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S1Sense);

    ledger
        .apply(&testing::belief_update(corr, testing::at(1)))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S2Model);

    let verify_first = testing::decision_builder(corr)
        .outcome(DecisionOutcome::VerifyFirst)
        .stakes(StakesLevel::Medium)
        .tier(QualityTier::Par)
        .envelope(|e| e.uncertainty(UncertaintyLevel::High))
        .build(testing::at(2));
    ledger.apply(&verify_first).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S4Verify);

    ledger
        .apply(&testing::verification_plan(corr, testing::at(3)))
        .unwrap();

    let directive = testing::directive_builder(corr, "task_v1")
        .timeout(60)
        .build(testing::at(4));
    ledger.apply(&directive).unwrap();
    assert!(ledger.has_open_directives());

    ledger
        .apply(&testing::task_result(
            corr,
            "task_v1",
            &directive.header.packet_id,
            TaskResultStatus::Success,
            testing::at(5),
        ))
        .unwrap();
    assert!(!ledger.has_open_directives());

    ledger
        .apply(&testing::observation(corr, testing::at(6)))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S4Verify);

    // The closing belief update references evidence gathered inside the
    // loop, satisfying the closure invariant.
    let closing = testing::belief_update_builder(corr)
        .evidence_ref("ev_sensor_read", testing::at(6))
        .build(testing::at(7));
    ledger.apply(&closing).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S2Model);
    assert!(ledger.verify_window().is_none());

    let act = testing::decision_builder(corr)
        .stakes(StakesLevel::Medium)
        .build(testing::at(8));
    ledger.apply(&act).unwrap();

    assert_eq!(ledger.current_state(), FsmState::S3Decide);
    assert!(!ledger.has_open_directives());
    assert!(ledger
        .evidence_index()
        .iter()
        .any(|entry| entry.evidence.ref_id == "ev_task_v1"));
    assert_eq!(ledger.snapshot().packet_count(), 9);
}

/// S1 negative: leaving the verification loop without its closure set is
/// rejected.
#[test]
fn scenario_verification_loop_incomplete_closure_rejected() {
    let corr = "corr_test_1n";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);

    ledger
        .apply(
            &testing::decision_builder(corr)
                .outcome(DecisionOutcome::VerifyFirst)
                .build(testing::t0()),
        )
        .unwrap();

    // Straight to a belief update: no plan, no read, no observation.
    let premature = testing::belief_update(corr, testing::at(1));
    let error = ledger.apply(&premature).unwrap_err();
    assert!(rejection_codes(&error).contains(&InvariantCode::Inv008));
    assert_eq!(ledger.current_state(), FsmState::S4Verify);
}

/// S2: a SUBPAR-tier ACT decision is rejected by INV-002 and leaves the
/// ledger untouched.
#[test]
fn scenario_subpar_blocks_act() {
    let corr = "corr_test_2";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);
    let before = ledger.snapshot();

    let decision = testing::decision_builder(corr)
        .tier(QualityTier::Subpar)
        .stakes(StakesLevel::High)
        .build(testing::t0());
    let error = ledger.apply(&decision).unwrap_err();

    assert!(rejection_codes(&error).contains(&InvariantCode::Inv002));
    assert_eq!(ledger.snapshot(), before);
}

/// S3: a write behind a token at HIGH stakes with SUPERB tier and
/// verified load-bearing assumptions.
#[test]
fn scenario_write_with_token() {
    let corr = "corr_test_3";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);

    let act = testing::decision_builder(corr)
        .stakes(StakesLevel::High)
        .tier(QualityTier::Superb)
        .load_bearing("market conditions verified", true)
        .build(testing::t0());
    ledger.apply(&act).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S3Decide);

    let token = testing::token_builder(corr, "token_w1")
        .scope(&["market_api"], &["write"])
        .max_uses(1)
        .expiry(testing::at(3600))
        .build(testing::at(1));
    ledger.apply(&token).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S5Authorize);

    let directive = testing::directive_builder(corr, "task_w1")
        .safety(ToolSafetyClass::Write)
        .tool("market_api", "write")
        .token("token_w1")
        .stakes(StakesLevel::High)
        .tier(QualityTier::Superb)
        .build(testing::at(2));
    ledger.apply(&directive).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S6Execute);
    assert_eq!(ledger.token("token_w1").unwrap().usage_count, 1);

    ledger
        .apply(&testing::task_result(
            corr,
            "task_w1",
            &directive.header.packet_id,
            TaskResultStatus::Success,
            testing::at(3),
        ))
        .unwrap();
    ledger
        .apply(&testing::observation(corr, testing::at(4)))
        .unwrap();
    ledger
        .apply(&testing::belief_update(corr, testing::at(5)))
        .unwrap();

    assert_eq!(ledger.current_state(), FsmState::S7Review);
    assert!(!ledger.has_open_directives());
}

/// S4: degraded tools at CRITICAL stakes. ACT is rejected; ESCALATE with
/// a well-formed escalation flows through.
#[test]
fn scenario_degraded_tools_critical_stakes() {
    let corr = "corr_test_4";

    // ACT variant: INV-010 rejects it even at SUPERB with verified
    // assumptions.
    let mut ledger = make_ledger(corr, FsmState::S0Idle);
    ledger
        .apply(&testing::observation(corr, testing::t0()))
        .unwrap();
    ledger
        .apply(&testing::belief_update(corr, testing::at(1)))
        .unwrap();

    let act = testing::decision_builder(corr)
        .stakes(StakesLevel::Critical)
        .tier(QualityTier::Superb)
        .load_bearing("all clear", true)
        .tools_state(ToolsState::ToolsPartial)
        .build(testing::at(2));
    let error = ledger.apply(&act).unwrap_err();
    assert!(rejection_codes(&error).contains(&InvariantCode::Inv010));

    // ESCALATE variant: admitted, then the escalation packet itself.
    let escalate = testing::decision_builder(corr)
        .outcome(DecisionOutcome::Escalate)
        .stakes(StakesLevel::Critical)
        .tools_state(ToolsState::ToolsPartial)
        .build(testing::at(3));
    ledger.apply(&escalate).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S8Escalated);

    let escalation = testing::escalation_builder(corr)
        .stakes(StakesLevel::Critical)
        .build(testing::at(4));
    ledger.apply(&escalation).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S8Escalated);

    let payload = ledger.recent_packets().last().unwrap().escalation().unwrap();
    assert!((2..=3).contains(&payload.top_options.len()));
    assert!(!payload.evidence_gaps.is_empty());
    assert!(!payload.recommended_next_step.is_empty());
}

/// S5: a budget overrun without approval blocks the next consequential
/// packet; a budget escalation plus operator input unblocks the flow.
#[test]
fn scenario_budget_overrun_without_approval() {
    let corr = "corr_test_5";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);

    // Default fixture budget is 1000 tokens.
    let events = ledger.consume(1001, 0, 0);
    assert!(events
        .iter()
        .any(|e| matches!(e, LedgerEvent::BudgetThreshold { .. })));

    let decision = testing::decision_builder(corr).build(testing::t0());
    let error = ledger.apply(&decision).unwrap_err();
    assert!(rejection_codes(&error).contains(&InvariantCode::Inv005));

    // The budget escalation is itself admitted and addresses the overrun.
    let escalation = testing::escalation_builder(corr)
        .trigger(cortex_core::packet::TRIGGER_BUDGET_INSUFFICIENT)
        .build(testing::at(1));
    ledger.apply(&escalation).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S8Escalated);
    assert!(ledger.overrun_addressed());

    // Operator responds; the decision is now admissible.
    ledger.apply_signal(EpisodeSignal::UserInput).unwrap();
    let retry = testing::decision_builder(corr).build(testing::at(2));
    ledger.apply(&retry).unwrap();
}

/// S6: an orphaned directive produces a timeout event at its deadline.
#[test]
fn scenario_orphan_directive_timeout() {
    let corr = "corr_test_6";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);
    ledger
        .apply(
            &testing::decision_builder(corr)
                .stakes(StakesLevel::High)
                .tier(QualityTier::Superb)
                .load_bearing("deadline honored", true)
                .build(testing::t0()),
        )
        .unwrap();

    let directive = testing::directive_builder(corr, "task_orphan")
        .timeout(60)
        .stakes(StakesLevel::High)
        .tier(QualityTier::Superb)
        .build(testing::at(1));
    ledger.apply(&directive).unwrap();

    // No result lands. The deadline passes.
    let events = ledger.check_timeouts(testing::at(62));
    assert!(matches!(
        events.as_slice(),
        [LedgerEvent::DirectiveTimeout { task_id, .. }] if task_id == "task_orphan"
    ));

    // A mid-execution escalation is admissible for the handoff.
    let escalation = testing::escalation_builder(corr)
        .trigger("task_timeout")
        .stakes(StakesLevel::High)
        .build(testing::at(63));
    ledger.apply(&escalation).unwrap();
    assert_eq!(ledger.current_state(), FsmState::S8Escalated);
}

/// Universal property: replaying an admitted stream into a fresh ledger
/// reproduces an identical snapshot.
#[test]
fn property_replay_idempotence() {
    let corr = "corr_prop_replay";
    let mut ledger = make_ledger(corr, FsmState::S0Idle);

    let directive = testing::directive_builder(corr, "task_p").build(testing::at(4));
    let packets = vec![
        testing::cached_observation(corr, testing::t0()),
        testing::belief_update(corr, testing::at(1)),
        testing::decision_builder(corr).build(testing::at(2)),
        directive.clone(),
        testing::task_result(
            corr,
            "task_p",
            &directive.header.packet_id,
            TaskResultStatus::Success,
            testing::at(5),
        ),
        testing::belief_update(corr, testing::at(6)),
    ];
    for packet in &packets {
        ledger.apply(packet).unwrap();
    }

    let mut replay = make_ledger(corr, FsmState::S0Idle);
    for packet in &packets {
        replay.apply(packet).unwrap();
    }
    assert_eq!(replay.snapshot(), ledger.snapshot());
}

/// Universal property: every admitted transition appears in the published
/// transition table.
#[test]
fn property_fsm_soundness() {
    let corr = "corr_prop_fsm";
    let mut ledger = make_ledger(corr, FsmState::S0Idle);

    let directive = testing::directive_builder(corr, "task_f").build(testing::at(4));
    let packets = vec![
        testing::observation(corr, testing::t0()),
        testing::belief_update(corr, testing::at(1)),
        testing::decision_builder(corr)
            .outcome(DecisionOutcome::VerifyFirst)
            .build(testing::at(2)),
        testing::verification_plan(corr, testing::at(3)),
        directive.clone(),
        testing::task_result(
            corr,
            "task_f",
            &directive.header.packet_id,
            TaskResultStatus::Success,
            testing::at(5),
        ),
        testing::observation(corr, testing::at(6)),
        testing::belief_update_builder(corr)
            .evidence_ref("ev_sensor_read", testing::at(6))
            .build(testing::at(7)),
        testing::decision_builder(corr).build(testing::at(8)),
    ];

    for packet in &packets {
        let before = ledger.current_state();
        let outcome = ledger.apply(packet).unwrap();
        let targets = fsm::transition_targets(before, packet.kind());
        assert!(
            targets.contains(&outcome.new_state),
            "transition {before} --{}--> {} not in table",
            packet.kind(),
            outcome.new_state
        );
    }
}

/// Universal property: cumulative budget usage never decreases.
#[test]
fn property_budget_monotonicity() {
    let corr = "corr_prop_budget";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);
    ledger
        .apply(&testing::decision_builder(corr).build(testing::t0()))
        .unwrap();

    let mut last_tools = 0;
    let mut last_time = 0;
    for i in 0..3_i64 {
        let task = format!("task_m{i}");
        let directive =
            testing::directive_builder(corr, &task).build(testing::at(1 + i * 2));
        ledger.apply(&directive).unwrap();
        ledger
            .apply(&testing::task_result(
                corr,
                &task,
                &directive.header.packet_id,
                TaskResultStatus::Success,
                testing::at(2 + i * 2),
            ))
            .unwrap();

        let budgets = ledger.budgets();
        assert!(budgets.tool_calls_used >= last_tools);
        assert!(budgets.time_seconds_used >= last_time);
        last_tools = budgets.tool_calls_used;
        last_time = budgets.time_seconds_used;
    }
    assert_eq!(last_tools, 3);
}

/// Universal property: safe mode admits only integrity alerts and belief
/// updates.
#[test]
fn property_safe_mode_containment() {
    let corr = "corr_prop_safemode";
    let mut ledger = make_ledger(corr, FsmState::S2Model);

    ledger
        .apply(&testing::integrity_alert(
            corr,
            "contract_violation",
            cortex_core::vocabulary::AlertSeverity::Critical,
            testing::t0(),
        ))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S9Safemode);

    // Everything except belief updates and alerts is rejected.
    assert!(ledger
        .apply(&testing::observation(corr, testing::at(1)))
        .is_err());
    assert!(ledger
        .apply(&testing::decision_builder(corr).build(testing::at(2)))
        .is_err());
    assert!(ledger
        .apply(&testing::directive_builder(corr, "task_s").build(testing::at(3)))
        .is_err());

    ledger
        .apply(&testing::belief_update(corr, testing::at(4)))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S9Safemode);

    // An INFO alert clears safe mode back to review.
    ledger
        .apply(&testing::integrity_alert(
            corr,
            "safe_mode_cleared",
            cortex_core::vocabulary::AlertSeverity::Info,
            testing::at(5),
        ))
        .unwrap();
    assert_eq!(ledger.current_state(), FsmState::S7Review);
}

/// Universal property: directive usage increments never exceed a token's
/// ceiling.
#[test]
fn property_token_conservation() {
    let corr = "corr_prop_token";
    let mut ledger = make_ledger(corr, FsmState::S3Decide);
    ledger
        .apply(&testing::decision_builder(corr).build(testing::t0()))
        .unwrap();
    ledger
        .apply(
            &testing::token_builder(corr, "token_c")
                .max_uses(2)
                .build(testing::at(1)),
        )
        .unwrap();

    let mut uses = 0;
    for i in 0..4_i64 {
        let task = format!("task_t{i}");
        let directive = testing::directive_builder(corr, &task)
            .safety(ToolSafetyClass::Write)
            .tool("market_api", "write")
            .token("token_c")
            .build(testing::at(2 + i * 2));
        if ledger.apply(&directive).is_ok() {
            uses += 1;
            ledger
                .apply(&testing::task_result(
                    corr,
                    &task,
                    &directive.header.packet_id,
                    TaskResultStatus::Success,
                    testing::at(3 + i * 2),
                ))
                .unwrap();
        }
        let token = ledger.token("token_c").unwrap();
        assert!(token.usage_count <= token.max_usage_count);
    }
    assert_eq!(uses, 2);
    assert_eq!(ledger.token("token_c").unwrap().usage_count, 2);
}

/// Every packet kind rides exactly one bus.
#[test]
fn property_bus_partition_over_trace() {
    let corr = "corr_prop_bus";
    let packets = [
        testing::observation(corr, testing::t0()),
        testing::belief_update(corr, testing::at(1)),
        testing::decision_builder(corr).build(testing::at(2)),
        testing::verification_plan(corr, testing::at(3)),
        testing::escalation_builder(corr).build(testing::at(4)),
        testing::token_builder(corr, "token_b").build(testing::at(5)),
        testing::directive_builder(corr, "task_b").build(testing::at(6)),
    ];
    for packet in &packets {
        let kind = packet.kind();
        assert!(
            kind.is_northbound() ^ kind.is_southbound(),
            "kind {kind} must ride exactly one bus"
        );
    }
}
