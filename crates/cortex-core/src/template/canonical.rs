//! The eight canonical episode topologies.
//!
//! Each template mirrors a legal path through the episode state machine.
//! Topologies are fixed; the compiler binds envelopes and constraints at
//! compile time.

use crate::vocabulary::{
    DecisionOutcome, FsmState, LayerId, PacketKind, QualityTier, TemplateId, ToolSafetyClass,
    ToolsState,
};

use super::{EpisodeTemplate, StepBindings, TemplateConstraints, TemplateStep};

fn step(
    step_id: &str,
    owner_layer: LayerId,
    fsm_state: FsmState,
    packet_kind: Option<PacketKind>,
    next_steps: &[&str],
) -> TemplateStep {
    TemplateStep {
        step_id: step_id.to_string(),
        owner_layer,
        fsm_state,
        packet_kind,
        next_steps: next_steps.iter().map(ToString::to_string).collect(),
        bindings: StepBindings::default(),
        guard_outcome: None,
    }
}

fn decision_step(
    step_id: &str,
    fsm_state: FsmState,
    outcome: DecisionOutcome,
    next_steps: &[&str],
) -> TemplateStep {
    TemplateStep {
        bindings: StepBindings {
            decision_outcome: Some(outcome),
            tool_safety: None,
        },
        ..step(
            step_id,
            LayerId::CognitiveControl,
            fsm_state,
            Some(PacketKind::Decision),
            next_steps,
        )
    }
}

fn directive_step(
    step_id: &str,
    fsm_state: FsmState,
    safety: ToolSafetyClass,
    next_steps: &[&str],
) -> TemplateStep {
    TemplateStep {
        bindings: StepBindings {
            decision_outcome: None,
            tool_safety: Some(safety),
        },
        ..step(
            step_id,
            LayerId::CognitiveControl,
            fsm_state,
            Some(PacketKind::TaskDirective),
            next_steps,
        )
    }
}

/// Template A: grounding loop. Sense, model, decide, review.
#[must_use]
pub fn template_a() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::A,
        name: "Grounding Loop".to_string(),
        description: "Sense the environment, update beliefs, decide, review.".to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Par,
            tools_states: vec![ToolsState::ToolsOk, ToolsState::ToolsPartial],
            write_allowed: false,
        },
        steps: vec![
            step(
                "sense",
                LayerId::TaskProsecution,
                FsmState::S0Idle,
                Some(PacketKind::Observation),
                &["model"],
            ),
            step(
                "model",
                LayerId::TaskProsecution,
                FsmState::S1Sense,
                Some(PacketKind::BeliefUpdate),
                &["decide"],
            ),
            decision_step("decide", FsmState::S2Model, DecisionOutcome::Defer, &["review"]),
            step(
                "review",
                LayerId::CognitiveControl,
                FsmState::S7Review,
                Some(PacketKind::BeliefUpdate),
                &[],
            ),
        ],
        entry_step: "sense".to_string(),
        exit_steps: vec!["review".to_string()],
    }
}

/// Template B: verification loop. VERIFY_FIRST, plan, read, observe,
/// integrate, re-decide.
#[must_use]
pub fn template_b() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::B,
        name: "Verification Loop".to_string(),
        description:
            "Verify before acting: plan the checks, execute reads, integrate evidence, re-decide."
                .to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Par,
            tools_states: vec![ToolsState::ToolsOk, ToolsState::ToolsPartial],
            write_allowed: false,
        },
        steps: vec![
            decision_step(
                "decide_verify",
                FsmState::S3Decide,
                DecisionOutcome::VerifyFirst,
                &["plan"],
            ),
            step(
                "plan",
                LayerId::CognitiveControl,
                FsmState::S4Verify,
                Some(PacketKind::VerificationPlan),
                &["execute_read"],
            ),
            directive_step(
                "execute_read",
                FsmState::S4Verify,
                ToolSafetyClass::Read,
                &["read_result"],
            ),
            step(
                "read_result",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::TaskResult),
                &["observe"],
            ),
            step(
                "observe",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::Observation),
                &["update_beliefs"],
            ),
            step(
                "update_beliefs",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::BeliefUpdate),
                &["re_decide"],
            ),
            decision_step(
                "re_decide",
                FsmState::S3Decide,
                DecisionOutcome::Act,
                &[],
            ),
        ],
        entry_step: "decide_verify".to_string(),
        exit_steps: vec!["re_decide".to_string()],
    }
}

/// Template C: read-only act. ACT with READ directives, no token needed.
#[must_use]
pub fn template_c() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::C,
        name: "Read-Only Act".to_string(),
        description: "ACT with READ directives; no authorization token required.".to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Par,
            tools_states: vec![ToolsState::ToolsOk, ToolsState::ToolsPartial],
            write_allowed: false,
        },
        steps: vec![
            decision_step("decide_act", FsmState::S3Decide, DecisionOutcome::Act, &["execute"]),
            directive_step(
                "execute",
                FsmState::S6Execute,
                ToolSafetyClass::Read,
                &["collect"],
            ),
            step(
                "collect",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::TaskResult),
                &["review"],
            ),
            step(
                "review",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::BeliefUpdate),
                &[],
            ),
        ],
        entry_step: "decide_act".to_string(),
        exit_steps: vec!["review".to_string()],
    }
}

/// Template D: write act. ACT, authorize, execute WRITE, integrate.
#[must_use]
pub fn template_d() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::D,
        name: "Write Act".to_string(),
        description: "ACT with WRITE directives behind an authorization token.".to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Superb,
            tools_states: vec![ToolsState::ToolsOk],
            write_allowed: true,
        },
        steps: vec![
            decision_step("decide_act", FsmState::S3Decide, DecisionOutcome::Act, &["authorize"]),
            step(
                "authorize",
                LayerId::CognitiveControl,
                FsmState::S5Authorize,
                Some(PacketKind::ToolAuthorizationToken),
                &["execute_write"],
            ),
            directive_step(
                "execute_write",
                FsmState::S6Execute,
                ToolSafetyClass::Write,
                &["result"],
            ),
            step(
                "result",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::TaskResult),
                &["observe"],
            ),
            step(
                "observe",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::Observation),
                &["integrate"],
            ),
            step(
                "integrate",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::BeliefUpdate),
                &[],
            ),
        ],
        entry_step: "decide_act".to_string(),
        exit_steps: vec!["integrate".to_string()],
    }
}

/// Template E: escalation. ESCALATE and hand off with options and gaps.
#[must_use]
pub fn template_e() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::E,
        name: "Escalation".to_string(),
        description: "Hand off to a human with options, gaps, and a recommendation.".to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Subpar,
            tools_states: vec![
                ToolsState::ToolsOk,
                ToolsState::ToolsPartial,
                ToolsState::ToolsDown,
            ],
            write_allowed: false,
        },
        steps: vec![
            decision_step(
                "decide_escalate",
                FsmState::S3Decide,
                DecisionOutcome::Escalate,
                &["escalate"],
            ),
            step(
                "escalate",
                LayerId::CognitiveControl,
                FsmState::S8Escalated,
                Some(PacketKind::Escalation),
                &[],
            ),
        ],
        entry_step: "decide_escalate".to_string(),
        exit_steps: vec!["escalate".to_string()],
    }
}

/// Template F: degraded tools. Sense what is reachable, then escalate or
/// hold depending on the assessment.
#[must_use]
pub fn template_f() -> EpisodeTemplate {
    let mut escalate_branch = decision_step(
        "assess",
        FsmState::S3Decide,
        DecisionOutcome::Escalate,
        &["escalate_or_wait", "hold"],
    );
    // The assess decision is not bound to one outcome: the successor is
    // guard-selected at runtime.
    escalate_branch.bindings.decision_outcome = None;

    let mut escalate_step = step(
        "escalate_or_wait",
        LayerId::CognitiveControl,
        FsmState::S8Escalated,
        Some(PacketKind::Escalation),
        &[],
    );
    escalate_step.guard_outcome = Some(DecisionOutcome::Escalate);

    let mut hold_step = step(
        "hold",
        LayerId::CognitiveControl,
        FsmState::S7Review,
        Some(PacketKind::BeliefUpdate),
        &[],
    );
    hold_step.guard_outcome = Some(DecisionOutcome::Defer);

    EpisodeTemplate {
        template_id: TemplateId::F,
        name: "Degraded Tools".to_string(),
        description: "Tightened posture when tools are partial or down; no writes.".to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Par,
            tools_states: vec![ToolsState::ToolsPartial, ToolsState::ToolsDown],
            write_allowed: false,
        },
        steps: vec![
            step(
                "sense_degraded",
                LayerId::TaskProsecution,
                FsmState::S0Idle,
                Some(PacketKind::Observation),
                &["model_degraded"],
            ),
            step(
                "model_degraded",
                LayerId::TaskProsecution,
                FsmState::S1Sense,
                Some(PacketKind::BeliefUpdate),
                &["assess"],
            ),
            escalate_branch,
            escalate_step,
            hold_step,
        ],
        entry_step: "sense_degraded".to_string(),
        exit_steps: vec!["escalate_or_wait".to_string(), "hold".to_string()],
    }
}

/// Template G: compile-to-code. Write act with a read-back test gate.
#[must_use]
pub fn template_g() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::G,
        name: "Compile-to-Code".to_string(),
        description: "Generate an artifact behind a token, then verify it with a read gate."
            .to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Superb,
            tools_states: vec![ToolsState::ToolsOk],
            write_allowed: true,
        },
        steps: vec![
            decision_step("decide_act", FsmState::S3Decide, DecisionOutcome::Act, &["authorize"]),
            step(
                "authorize",
                LayerId::CognitiveControl,
                FsmState::S5Authorize,
                Some(PacketKind::ToolAuthorizationToken),
                &["generate"],
            ),
            directive_step(
                "generate",
                FsmState::S6Execute,
                ToolSafetyClass::Write,
                &["generate_result"],
            ),
            step(
                "generate_result",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::TaskResult),
                &["test_gate"],
            ),
            directive_step(
                "test_gate",
                FsmState::S6Execute,
                ToolSafetyClass::Read,
                &["test_result"],
            ),
            step(
                "test_result",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::TaskResult),
                &["integrate"],
            ),
            step(
                "integrate",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::BeliefUpdate),
                &[],
            ),
        ],
        entry_step: "decide_act".to_string(),
        exit_steps: vec!["integrate".to_string()],
    }
}

/// Template H: full-stack flow. Ground, verify, authorize, write,
/// integrate.
#[must_use]
pub fn template_h() -> EpisodeTemplate {
    EpisodeTemplate {
        template_id: TemplateId::H,
        name: "Full-Stack Flow".to_string(),
        description:
            "Complete cycle: ground the model, verify the key unknown, authorize, write, integrate."
                .to_string(),
        constraints: TemplateConstraints {
            min_tier: QualityTier::Superb,
            tools_states: vec![ToolsState::ToolsOk],
            write_allowed: true,
        },
        steps: vec![
            step(
                "sense",
                LayerId::TaskProsecution,
                FsmState::S0Idle,
                Some(PacketKind::Observation),
                &["model"],
            ),
            step(
                "model",
                LayerId::TaskProsecution,
                FsmState::S1Sense,
                Some(PacketKind::BeliefUpdate),
                &["decide_verify"],
            ),
            decision_step(
                "decide_verify",
                FsmState::S2Model,
                DecisionOutcome::VerifyFirst,
                &["plan"],
            ),
            step(
                "plan",
                LayerId::CognitiveControl,
                FsmState::S4Verify,
                Some(PacketKind::VerificationPlan),
                &["verify_read"],
            ),
            directive_step(
                "verify_read",
                FsmState::S4Verify,
                ToolSafetyClass::Read,
                &["verify_result"],
            ),
            step(
                "verify_result",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::TaskResult),
                &["verify_observe"],
            ),
            step(
                "verify_observe",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::Observation),
                &["verify_beliefs"],
            ),
            step(
                "verify_beliefs",
                LayerId::TaskProsecution,
                FsmState::S4Verify,
                Some(PacketKind::BeliefUpdate),
                &["re_decide"],
            ),
            decision_step("re_decide", FsmState::S3Decide, DecisionOutcome::Act, &["authorize"]),
            step(
                "authorize",
                LayerId::CognitiveControl,
                FsmState::S5Authorize,
                Some(PacketKind::ToolAuthorizationToken),
                &["execute_write"],
            ),
            directive_step(
                "execute_write",
                FsmState::S6Execute,
                ToolSafetyClass::Write,
                &["result"],
            ),
            step(
                "result",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::TaskResult),
                &["integrate"],
            ),
            step(
                "integrate",
                LayerId::TaskProsecution,
                FsmState::S6Execute,
                Some(PacketKind::BeliefUpdate),
                &[],
            ),
        ],
        entry_step: "sense".to_string(),
        exit_steps: vec!["integrate".to_string()],
    }
}

/// Returns the canonical template for an id.
#[must_use]
pub fn template(template_id: TemplateId) -> EpisodeTemplate {
    match template_id {
        TemplateId::A => template_a(),
        TemplateId::B => template_b(),
        TemplateId::C => template_c(),
        TemplateId::D => template_d(),
        TemplateId::E => template_e(),
        TemplateId::F => template_f(),
        TemplateId::G => template_g(),
        TemplateId::H => template_h(),
    }
}

/// All eight canonical templates in id order.
#[must_use]
pub fn all() -> Vec<EpisodeTemplate> {
    [
        TemplateId::A,
        TemplateId::B,
        TemplateId::C,
        TemplateId::D,
        TemplateId::E,
        TemplateId::F,
        TemplateId::G,
        TemplateId::H,
    ]
    .into_iter()
    .map(template)
    .collect()
}
