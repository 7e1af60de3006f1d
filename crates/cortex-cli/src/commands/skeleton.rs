//! Skeleton layers: deterministic packet generation for compiled
//! episodes.
//!
//! `compile` drives the real runner with these layers so the emitted
//! JSONL is exactly what the validation engine admits. Each step's packet
//! is generated from its compiled envelope and bindings, threading task
//! ids, directive packet ids, tokens, and evidence references the way a
//! live deployment's layers would.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use cortex_core::layer::{Layer, LayerError, LayerInput};
use cortex_core::packet::{
    AuthorizedScope, BeliefChange, BeliefUpdatePayload, ConstraintsSatisfied, DecisionPayload,
    EscalationOption, EscalationPayload, Evidence, EvidenceRef, ExecutionMeta,
    LoadBearingAssumption, McpEnvelope, ObservationPayload, Packet, PacketHeader, PacketPayload,
    TaskDirectivePayload, TaskResultPayload, TokenPayload, VerificationItem,
    VerificationPlanPayload,
};
use cortex_core::template::CompiledStep;
use cortex_core::vocabulary::{
    DecisionOutcome, EpistemicStatus, EvidenceRefType, FreshnessClass, LayerId, PacketKind,
    QualityTier, TaskResultStatus, ToolSafetyClass, ToolsState,
};

const READ_TOOL: &str = "sensor_api";
const WRITE_TOOL: &str = "journal";

/// Shared generation state threaded across the skeleton layers.
#[derive(Debug)]
pub struct SkeletonState {
    base: DateTime<Utc>,
    seq: i64,
    task_counter: usize,
    open_task: Option<(String, String)>,
    token_id: Option<String>,
    last_evidence: Option<EvidenceRef>,
    packets: Vec<Packet>,
}

impl SkeletonState {
    /// Fresh state with packet timestamps starting at `base`.
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            seq: 0,
            task_counter: 0,
            open_task: None,
            token_id: None,
            last_evidence: None,
            packets: Vec::new(),
        }
    }

    /// All packets generated so far, in order.
    #[must_use]
    pub fn packets(&self) -> Vec<Packet> {
        self.packets.clone()
    }

    fn next_at(&mut self) -> DateTime<Utc> {
        let at = self.base + Duration::seconds(self.seq);
        self.seq += 1;
        at
    }
}

/// Cloneable handle to the shared state.
pub type SharedState = Arc<Mutex<SkeletonState>>;

/// Creates a shared state handle.
#[must_use]
pub fn shared_state(base: DateTime<Utc>) -> SharedState {
    Arc::new(Mutex::new(SkeletonState::new(base)))
}

/// Locks the shared state, recovering from poisoning.
pub fn lock(state: &SharedState) -> MutexGuard<'_, SkeletonState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A layer that generates one skeleton packet per step.
pub struct SkeletonLayer {
    layer_id: LayerId,
    state: SharedState,
}

impl SkeletonLayer {
    /// A skeleton layer playing the given role over shared state.
    #[must_use]
    pub fn new(layer_id: LayerId, state: SharedState) -> Self {
        Self { layer_id, state }
    }
}

impl Layer for SkeletonLayer {
    fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    fn invoke(&mut self, input: LayerInput<'_>) -> Result<Vec<Packet>, LayerError> {
        let Some(kind) = input.step.packet_kind else {
            return Ok(Vec::new());
        };
        let mut state = lock(&self.state);
        let packet = generate(&mut state, kind, input.step, input.correlation_id, self.layer_id);
        state.packets.push(packet.clone());
        Ok(vec![packet])
    }
}

fn generate(
    state: &mut SkeletonState,
    kind: PacketKind,
    step: &CompiledStep,
    correlation_id: &str,
    layer: LayerId,
) -> Packet {
    let at = state.next_at();
    let envelope = step.envelope.clone();
    let header = PacketHeader::new(kind, layer, correlation_id, at);

    match kind {
        PacketKind::Observation => observation(state, header, envelope, at),
        PacketKind::BeliefUpdate => belief_update(state, header, envelope),
        PacketKind::Decision => decision(header, envelope, step),
        PacketKind::VerificationPlan => verification_plan(header, envelope),
        PacketKind::ToolAuthorizationToken => token(state, header, envelope, at),
        PacketKind::TaskDirective => directive(state, header, envelope, step),
        PacketKind::TaskResult => task_result(state, header, envelope, at),
        PacketKind::Escalation => escalation(header, envelope),
        PacketKind::IntegrityAlert => integrity_alert(header, envelope),
    }
}

fn observation(
    state: &mut SkeletonState,
    header: PacketHeader,
    mut envelope: McpEnvelope,
    at: DateTime<Utc>,
) -> Packet {
    let evidence = EvidenceRef {
        ref_type: EvidenceRefType::ToolOutput,
        ref_id: format!("ev_obs_{}", state.seq),
        timestamp: at,
        reliability_score: Some(0.95),
    };
    envelope.epistemics.status = EpistemicStatus::Observed;
    envelope.epistemics.confidence = 0.9;
    envelope.epistemics.freshness_class = FreshnessClass::Realtime;
    envelope.evidence = Evidence::from_refs(vec![evidence.clone()]);
    state.last_evidence = Some(evidence);

    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::Observation(ObservationPayload {
            observation_type: "telemetry".to_string(),
            data: serde_json::json!({ "status": "nominal", "sequence": state.seq }),
            source_tool: Some(READ_TOOL.to_string()),
            reliability: Some(0.95),
        }),
    }
}

fn belief_update(
    state: &mut SkeletonState,
    header: PacketHeader,
    mut envelope: McpEnvelope,
) -> Packet {
    if let Some(evidence) = &state.last_evidence {
        envelope.evidence = Evidence::from_refs(vec![evidence.clone()]);
    }
    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::BeliefUpdate(BeliefUpdatePayload {
            update_type: "integration".to_string(),
            belief_changes: vec![BeliefChange {
                domain: "environment".to_string(),
                key: "status".to_string(),
                new_value: serde_json::json!("nominal"),
                prior_value: Some(serde_json::json!("unknown")),
            }],
            contradiction_details: None,
        }),
    }
}

fn decision(header: PacketHeader, envelope: McpEnvelope, step: &CompiledStep) -> Packet {
    let outcome = effective_outcome(step.bindings.decision_outcome, &envelope);
    let load_bearing_assumptions = if outcome == DecisionOutcome::Act
        && envelope.stakes.stakes_level.is_elevated()
    {
        vec![LoadBearingAssumption {
            assumption: "the verified reading still holds".to_string(),
            verified: true,
            verification_packet_id: None,
        }]
    } else {
        Vec::new()
    };

    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::Decision(DecisionPayload {
            decision_outcome: outcome,
            decision_summary: format!("{outcome:?} selected for step {}", step.step_id),
            constraints_satisfied: ConstraintsSatisfied {
                constitutional_check: true,
                budget_check: true,
                tier_check: true,
            },
            chosen_option_id: None,
            rejected_options: Vec::new(),
            load_bearing_assumptions,
        }),
    }
}

/// Picks an outcome the invariant validator will admit for this envelope.
fn effective_outcome(bound: Option<DecisionOutcome>, envelope: &McpEnvelope) -> DecisionOutcome {
    let outcome = bound.unwrap_or_else(|| {
        if envelope.routing.tools_state == ToolsState::ToolsOk {
            DecisionOutcome::Defer
        } else {
            DecisionOutcome::Escalate
        }
    });
    if outcome != DecisionOutcome::Act {
        return outcome;
    }
    // ACT is gated: SUBPAR never acts, elevated stakes need SUPERB, and
    // degraded tools at elevated stakes forbid action outright.
    let stakes = envelope.stakes.stakes_level;
    if envelope.quality.tier == QualityTier::Subpar
        || (stakes.is_elevated() && envelope.quality.tier != QualityTier::Superb)
        || (stakes.is_elevated() && envelope.routing.tools_state == ToolsState::ToolsDown)
    {
        return DecisionOutcome::Escalate;
    }
    DecisionOutcome::Act
}

fn verification_plan(header: PacketHeader, envelope: McpEnvelope) -> Packet {
    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::VerificationPlan(VerificationPlanPayload {
            items: vec![VerificationItem {
                item_id: "check_key_unknown".to_string(),
                claim: "the modelled state matches reality".to_string(),
                method: "fresh read through the sensor tool".to_string(),
            }],
        }),
    }
}

fn token(
    state: &mut SkeletonState,
    header: PacketHeader,
    envelope: McpEnvelope,
    at: DateTime<Utc>,
) -> Packet {
    let token_id = format!("token_step_{}", state.seq);
    state.token_id = Some(token_id.clone());
    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::ToolAuthorizationToken(TokenPayload {
            token_id,
            authorized_scope: AuthorizedScope {
                tool_ids: vec![WRITE_TOOL.to_string()],
                operation_types: vec!["write".to_string()],
                resource_constraints: None,
            },
            expiry: at + Duration::hours(1),
            max_usage_count: 3,
            issuer_layer: LayerId::CognitiveControl,
            usage_count: 0,
            revoked: false,
            revoked_reason: None,
        }),
    }
}

fn directive(
    state: &mut SkeletonState,
    header: PacketHeader,
    envelope: McpEnvelope,
    step: &CompiledStep,
) -> Packet {
    state.task_counter += 1;
    let task_id = format!("task_step_{}", state.task_counter);
    let safety = step.bindings.tool_safety.unwrap_or(ToolSafetyClass::Read);
    let (tool_id, operation_type, authorization_token_id) = if safety.requires_authorization() {
        (
            WRITE_TOOL.to_string(),
            "write".to_string(),
            state.token_id.clone(),
        )
    } else {
        (READ_TOOL.to_string(), "read".to_string(), None)
    };

    state.open_task = Some((task_id.clone(), header.packet_id.clone()));

    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::TaskDirective(TaskDirectivePayload {
            task_id,
            task_type: if safety.requires_authorization() {
                "artifact_write".to_string()
            } else {
                "sensor_read".to_string()
            },
            execution_method: "tool_call".to_string(),
            tool_safety_class: Some(safety),
            tool_id: Some(tool_id),
            operation_type: Some(operation_type),
            authorization_token_id,
            timeout_seconds: Some(120),
        }),
    }
}

fn task_result(
    state: &mut SkeletonState,
    header: PacketHeader,
    mut envelope: McpEnvelope,
    at: DateTime<Utc>,
) -> Packet {
    let (task_id, directive_packet_id) = state
        .open_task
        .take()
        .unwrap_or_else(|| ("task_unmatched".to_string(), "pkt_unmatched".to_string()));
    let evidence = EvidenceRef {
        ref_type: EvidenceRefType::ToolOutput,
        ref_id: format!("ev_{task_id}"),
        timestamp: at,
        reliability_score: Some(0.95),
    };
    envelope.epistemics.status = EpistemicStatus::Observed;
    envelope.epistemics.confidence = 0.9;
    envelope.epistemics.freshness_class = FreshnessClass::Realtime;
    envelope.evidence = Evidence::from_refs(vec![evidence.clone()]);
    state.last_evidence = Some(evidence);

    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::TaskResult(TaskResultPayload {
            task_id,
            directive_packet_id,
            result_status: TaskResultStatus::Success,
            error_details: None,
            execution: Some(ExecutionMeta {
                duration_ms: Some(250),
                tool_calls: Some(1),
            }),
        }),
    }
}

fn escalation(header: PacketHeader, envelope: McpEnvelope) -> Packet {
    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::Escalation(EscalationPayload {
            escalation_trigger: "operator_decision_required".to_string(),
            top_options: vec![
                EscalationOption {
                    option_id: "hold".to_string(),
                    description: "hold and gather more evidence".to_string(),
                    pros: vec!["no irreversible action".to_string()],
                    cons: vec!["the window may close".to_string()],
                },
                EscalationOption {
                    option_id: "proceed".to_string(),
                    description: "proceed under the declared constraints".to_string(),
                    pros: vec!["captures the opportunity".to_string()],
                    cons: vec!["acts under residual uncertainty".to_string()],
                },
            ],
            evidence_gaps: vec!["no fresh reading for the key unknown".to_string()],
            recommended_next_step: "await operator direction".to_string(),
        }),
    }
}

fn integrity_alert(header: PacketHeader, envelope: McpEnvelope) -> Packet {
    Packet {
        header,
        mcp: Some(envelope),
        payload: PacketPayload::IntegrityAlert(cortex_core::packet::IntegrityAlertPayload {
            alert_type: "status".to_string(),
            severity: cortex_core::vocabulary::AlertSeverity::Info,
            message: "skeleton integrity status".to_string(),
        }),
    }
}
