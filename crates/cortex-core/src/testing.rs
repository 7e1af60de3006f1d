//! Shared test fixtures for packet construction.
//!
//! Gated behind the `test-support` cargo feature (and always available to
//! this crate's own unit tests) so production builds are unaffected.
//! Enable via `[dev-dependencies] cortex-core = { path = ...,
//! features = ["test-support"] }`.
//!
//! The builders produce protocol-valid packets by default; tests tighten or
//! break individual fields to probe specific rules.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::packet::{
    AuthorizedScope, BeliefChange, BeliefUpdatePayload, Budgets, ConstraintsSatisfied,
    DecisionPayload, DefinitionOfDone, Epistemics, EscalationOption, EscalationPayload, Evidence,
    EvidenceRef, IntegrityAlertPayload, Intent, LoadBearingAssumption, McpEnvelope,
    ObservationPayload, Packet, PacketHeader, PacketPayload, Quality, RiskBudget, Routing,
    TaskDirectivePayload, TaskResultPayload, TokenPayload, VerificationItem,
    VerificationPlanPayload,
};
use crate::vocabulary::{
    AlertSeverity, DecisionOutcome, EpistemicStatus, EvidenceRefType, FreshnessClass, ImpactLevel,
    LayerId, PacketKind, QualityTier, StakesLevel, TaskClass, TaskResultStatus, ToolSafetyClass,
    ToolsState, UncertaintyLevel, VerificationRequirement,
};

/// Fixed base time used across fixtures.
#[must_use]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// `t0` plus an offset in seconds.
#[must_use]
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(offset_secs)
}

/// Consistent stakes block for a declared level.
#[must_use]
pub const fn stakes(level: StakesLevel) -> crate::packet::Stakes {
    crate::packet::Stakes::consistent(level)
}

/// Builder for policy envelopes with protocol-valid defaults.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    envelope: McpEnvelope,
}

impl EnvelopeBuilder {
    /// An envelope with LOW stakes, PAR tier, tools OK, and an explicit
    /// evidence-absent reason.
    #[must_use]
    pub fn new() -> Self {
        Self {
            envelope: McpEnvelope {
                intent: Intent {
                    summary: "test intent".to_string(),
                    scope: "test".to_string(),
                },
                stakes: crate::packet::Stakes::consistent(StakesLevel::Low),
                quality: Quality {
                    tier: QualityTier::Par,
                    satisficing_mode: true,
                    definition_of_done: DefinitionOfDone {
                        text: "episode completes".to_string(),
                        checks: vec!["all packets admitted".to_string()],
                    },
                    verification_requirement: VerificationRequirement::Optional,
                },
                budgets: Budgets {
                    token_budget: 1000,
                    tool_call_budget: 5,
                    time_budget_seconds: 120,
                    risk_budget: RiskBudget {
                        envelope: "low".to_string(),
                        max_loss: serde_json::json!("minimal"),
                    },
                },
                epistemics: Epistemics {
                    status: EpistemicStatus::Derived,
                    confidence: 0.8,
                    calibration_note: "derived from admitted evidence".to_string(),
                    freshness_class: FreshnessClass::Strategic,
                    stale_if_older_than_seconds: None,
                    assumptions: Vec::new(),
                },
                evidence: Evidence::absent("no tool read executed yet"),
                routing: Routing {
                    task_class: TaskClass::Lookup,
                    tools_state: ToolsState::ToolsOk,
                },
            },
        }
    }

    /// Sets the declared stakes level with consistent axes.
    #[must_use]
    pub fn stakes(mut self, level: StakesLevel) -> Self {
        self.envelope.stakes = crate::packet::Stakes::consistent(level);
        self
    }

    /// Overrides the impact axis only.
    #[must_use]
    pub fn impact(mut self, impact: ImpactLevel) -> Self {
        self.envelope.stakes.impact = impact;
        self
    }

    /// Overrides the uncertainty axis only.
    #[must_use]
    pub fn uncertainty(mut self, uncertainty: UncertaintyLevel) -> Self {
        self.envelope.stakes.uncertainty = uncertainty;
        self
    }

    /// Overrides the declared aggregate level without touching the axes.
    #[must_use]
    pub fn declared_level(mut self, level: StakesLevel) -> Self {
        self.envelope.stakes.stakes_level = level;
        self
    }

    /// Sets the quality tier.
    #[must_use]
    pub fn tier(mut self, tier: QualityTier) -> Self {
        self.envelope.quality.tier = tier;
        self
    }

    /// Sets the tools state.
    #[must_use]
    pub fn tools_state(mut self, tools_state: ToolsState) -> Self {
        self.envelope.routing.tools_state = tools_state;
        self
    }

    /// Sets the task class.
    #[must_use]
    pub fn task_class(mut self, task_class: TaskClass) -> Self {
        self.envelope.routing.task_class = task_class;
        self
    }

    /// Sets the three budget axes.
    #[must_use]
    pub fn budgets(mut self, tokens: u64, tool_calls: u64, time_seconds: u64) -> Self {
        self.envelope.budgets.token_budget = tokens;
        self.envelope.budgets.tool_call_budget = tool_calls;
        self.envelope.budgets.time_budget_seconds = time_seconds;
        self
    }

    /// Sets the epistemic status, confidence, and freshness class.
    #[must_use]
    pub fn epistemics(
        mut self,
        status: EpistemicStatus,
        confidence: f64,
        freshness: FreshnessClass,
    ) -> Self {
        self.envelope.epistemics.status = status;
        self.envelope.epistemics.confidence = confidence;
        self.envelope.epistemics.freshness_class = freshness;
        self
    }

    /// Sets the per-packet staleness override.
    #[must_use]
    pub fn stale_after(mut self, seconds: u64) -> Self {
        self.envelope.epistemics.stale_if_older_than_seconds = Some(seconds);
        self
    }

    /// Replaces the evidence block.
    #[must_use]
    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.envelope.evidence = evidence;
        self
    }

    /// Clears the definition-of-done checks (schema-invalid on purpose).
    #[must_use]
    pub fn no_checks(mut self) -> Self {
        self.envelope.quality.definition_of_done.checks.clear();
        self
    }

    /// Finishes the envelope.
    #[must_use]
    pub fn build(self) -> McpEnvelope {
        self.envelope
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fresh tool-output evidence reference captured at `timestamp`.
#[must_use]
pub fn tool_evidence(ref_id: &str, timestamp: DateTime<Utc>) -> EvidenceRef {
    EvidenceRef {
        ref_type: EvidenceRefType::ToolOutput,
        ref_id: ref_id.to_string(),
        timestamp,
        reliability_score: Some(0.95),
    }
}

fn header(
    kind: PacketKind,
    layer: LayerId,
    correlation_id: &str,
    created_at: DateTime<Utc>,
) -> PacketHeader {
    PacketHeader::new(kind, layer, correlation_id, created_at)
}

/// A fresh, grounded Observation (OBSERVED, tool-output evidence).
#[must_use]
pub fn observation(correlation_id: &str, created_at: DateTime<Utc>) -> Packet {
    let envelope = EnvelopeBuilder::new()
        .epistemics(EpistemicStatus::Observed, 0.9, FreshnessClass::Realtime)
        .evidence(Evidence::from_refs(vec![tool_evidence(
            "ev_sensor_read",
            created_at,
        )]))
        .build();
    Packet {
        header: header(
            PacketKind::Observation,
            LayerId::TaskProsecution,
            correlation_id,
            created_at,
        ),
        mcp: Some(envelope),
        payload: PacketPayload::Observation(ObservationPayload {
            observation_type: "telemetry".to_string(),
            data: serde_json::json!({"reading": 42}),
            source_tool: Some("sensor_api".to_string()),
            reliability: Some(0.95),
        }),
    }
}

/// An Observation served from cache (REMEMBERED, memory evidence).
#[must_use]
pub fn cached_observation(correlation_id: &str, created_at: DateTime<Utc>) -> Packet {
    let envelope = EnvelopeBuilder::new()
        .epistemics(EpistemicStatus::Remembered, 0.6, FreshnessClass::Operational)
        .evidence(Evidence::from_refs(vec![EvidenceRef {
            ref_type: EvidenceRefType::MemoryItem,
            ref_id: "ev_cache_entry".to_string(),
            timestamp: created_at - Duration::hours(6),
            reliability_score: Some(0.6),
        }]))
        .build();
    Packet {
        header: header(
            PacketKind::Observation,
            LayerId::TaskProsecution,
            correlation_id,
            created_at,
        ),
        mcp: Some(envelope),
        payload: PacketPayload::Observation(ObservationPayload {
            observation_type: "cache_read".to_string(),
            data: serde_json::json!({"reading": 17, "age_hours": 6}),
            source_tool: None,
            reliability: Some(0.6),
        }),
    }
}

/// Builder for BeliefUpdate packets.
#[derive(Debug, Clone)]
pub struct BeliefUpdateBuilder {
    correlation_id: String,
    envelope: EnvelopeBuilder,
    payload: BeliefUpdatePayload,
}

/// Starts a BeliefUpdate builder with a single integration change.
#[must_use]
pub fn belief_update_builder(correlation_id: &str) -> BeliefUpdateBuilder {
    BeliefUpdateBuilder {
        correlation_id: correlation_id.to_string(),
        envelope: EnvelopeBuilder::new(),
        payload: BeliefUpdatePayload {
            update_type: "integration".to_string(),
            belief_changes: vec![BeliefChange {
                domain: "environment".to_string(),
                key: "reading".to_string(),
                new_value: serde_json::json!(42),
                prior_value: Some(serde_json::json!(17)),
            }],
            contradiction_details: None,
        },
    }
}

impl BeliefUpdateBuilder {
    /// Sets the update type.
    #[must_use]
    pub fn update_type(mut self, update_type: &str) -> Self {
        self.payload.update_type = update_type.to_string();
        self
    }

    /// Attaches contradiction details.
    #[must_use]
    pub fn contradiction(mut self, description: &str) -> Self {
        self.payload.contradiction_details = Some(crate::packet::ContradictionDetails {
            description: description.to_string(),
            conflicting_packet_ids: Vec::new(),
        });
        self
    }

    /// Adds an evidence reference to the envelope (verification closure
    /// checks look for these).
    #[must_use]
    pub fn evidence_ref(mut self, ref_id: &str, timestamp: DateTime<Utc>) -> Self {
        self.envelope = self
            .envelope
            .evidence(Evidence::from_refs(vec![tool_evidence(ref_id, timestamp)]));
        self
    }

    /// Applies a transform to the envelope builder.
    #[must_use]
    pub fn envelope(mut self, f: impl FnOnce(EnvelopeBuilder) -> EnvelopeBuilder) -> Self {
        self.envelope = f(self.envelope);
        self
    }

    /// Finishes the packet.
    #[must_use]
    pub fn build(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::BeliefUpdate,
                LayerId::TaskProsecution,
                &self.correlation_id,
                created_at,
            ),
            mcp: Some(self.envelope.build()),
            payload: PacketPayload::BeliefUpdate(self.payload),
        }
    }
}

/// A plain integration BeliefUpdate.
#[must_use]
pub fn belief_update(correlation_id: &str, created_at: DateTime<Utc>) -> Packet {
    belief_update_builder(correlation_id).build(created_at)
}

/// Builder for Decision packets.
#[derive(Debug, Clone)]
pub struct DecisionBuilder {
    correlation_id: String,
    envelope: EnvelopeBuilder,
    payload: DecisionPayload,
}

/// Starts a Decision builder with outcome ACT and all gates satisfied.
#[must_use]
pub fn decision_builder(correlation_id: &str) -> DecisionBuilder {
    DecisionBuilder {
        correlation_id: correlation_id.to_string(),
        envelope: EnvelopeBuilder::new(),
        payload: DecisionPayload {
            decision_outcome: DecisionOutcome::Act,
            decision_summary: "proceed with the planned action".to_string(),
            constraints_satisfied: ConstraintsSatisfied {
                constitutional_check: true,
                budget_check: true,
                tier_check: true,
            },
            chosen_option_id: None,
            rejected_options: Vec::new(),
            load_bearing_assumptions: Vec::new(),
        },
    }
}

impl DecisionBuilder {
    /// Sets the decision outcome.
    #[must_use]
    pub fn outcome(mut self, outcome: DecisionOutcome) -> Self {
        self.payload.decision_outcome = outcome;
        self
    }

    /// Sets the decision summary.
    #[must_use]
    pub fn summary(mut self, summary: &str) -> Self {
        self.payload.decision_summary = summary.to_string();
        self
    }

    /// Sets the three constraint gates.
    #[must_use]
    pub fn constraints(mut self, constitutional: bool, budget: bool, tier: bool) -> Self {
        self.payload.constraints_satisfied = ConstraintsSatisfied {
            constitutional_check: constitutional,
            budget_check: budget,
            tier_check: tier,
        };
        self
    }

    /// Adds a load-bearing assumption.
    #[must_use]
    pub fn load_bearing(mut self, assumption: &str, verified: bool) -> Self {
        self.payload
            .load_bearing_assumptions
            .push(LoadBearingAssumption {
                assumption: assumption.to_string(),
                verified,
                verification_packet_id: None,
            });
        self
    }

    /// Sets the declared stakes level with consistent axes.
    #[must_use]
    pub fn stakes(mut self, level: StakesLevel) -> Self {
        self.envelope = self.envelope.stakes(level);
        self
    }

    /// Sets the quality tier.
    #[must_use]
    pub fn tier(mut self, tier: QualityTier) -> Self {
        self.envelope = self.envelope.tier(tier);
        self
    }

    /// Sets the tools state.
    #[must_use]
    pub fn tools_state(mut self, tools_state: ToolsState) -> Self {
        self.envelope = self.envelope.tools_state(tools_state);
        self
    }

    /// Applies a transform to the envelope builder.
    #[must_use]
    pub fn envelope(mut self, f: impl FnOnce(EnvelopeBuilder) -> EnvelopeBuilder) -> Self {
        self.envelope = f(self.envelope);
        self
    }

    /// Drops the envelope entirely (schema-invalid for a Decision).
    #[must_use]
    pub fn build_without_envelope(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::Decision,
                LayerId::CognitiveControl,
                &self.correlation_id,
                created_at,
            ),
            mcp: None,
            payload: PacketPayload::Decision(self.payload),
        }
    }

    /// Finishes the packet.
    #[must_use]
    pub fn build(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::Decision,
                LayerId::CognitiveControl,
                &self.correlation_id,
                created_at,
            ),
            mcp: Some(self.envelope.build()),
            payload: PacketPayload::Decision(self.payload),
        }
    }
}

/// A VerificationPlan with a single item.
#[must_use]
pub fn verification_plan(correlation_id: &str, created_at: DateTime<Utc>) -> Packet {
    Packet {
        header: header(
            PacketKind::VerificationPlan,
            LayerId::CognitiveControl,
            correlation_id,
            created_at,
        ),
        mcp: Some(EnvelopeBuilder::new().task_class(TaskClass::Verify).build()),
        payload: PacketPayload::VerificationPlan(VerificationPlanPayload {
            items: vec![VerificationItem {
                item_id: "check_reading".to_string(),
                claim: "the cached reading still holds".to_string(),
                method: "fresh sensor read".to_string(),
            }],
        }),
    }
}

/// Builder for TaskDirective packets.
#[derive(Debug, Clone)]
pub struct DirectiveBuilder {
    correlation_id: String,
    envelope: EnvelopeBuilder,
    payload: TaskDirectivePayload,
}

/// Starts a READ directive builder for the given task id.
#[must_use]
pub fn directive_builder(correlation_id: &str, task_id: &str) -> DirectiveBuilder {
    DirectiveBuilder {
        correlation_id: correlation_id.to_string(),
        envelope: EnvelopeBuilder::new().task_class(TaskClass::Verify),
        payload: TaskDirectivePayload {
            task_id: task_id.to_string(),
            task_type: "sensor_read".to_string(),
            execution_method: "tool_call".to_string(),
            tool_safety_class: Some(ToolSafetyClass::Read),
            tool_id: Some("sensor_api".to_string()),
            operation_type: Some("read".to_string()),
            authorization_token_id: None,
            timeout_seconds: Some(60),
        },
    }
}

impl DirectiveBuilder {
    /// Sets the safety class.
    #[must_use]
    pub fn safety(mut self, safety: ToolSafetyClass) -> Self {
        self.payload.tool_safety_class = Some(safety);
        self
    }

    /// Sets the target tool and operation type.
    #[must_use]
    pub fn tool(mut self, tool_id: &str, operation_type: &str) -> Self {
        self.payload.tool_id = Some(tool_id.to_string());
        self.payload.operation_type = Some(operation_type.to_string());
        self
    }

    /// References an authorization token.
    #[must_use]
    pub fn token(mut self, token_id: &str) -> Self {
        self.payload.authorization_token_id = Some(token_id.to_string());
        self
    }

    /// Sets the result deadline.
    #[must_use]
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.payload.timeout_seconds = Some(seconds);
        self
    }

    /// Sets the declared stakes level with consistent axes.
    #[must_use]
    pub fn stakes(mut self, level: StakesLevel) -> Self {
        self.envelope = self.envelope.stakes(level);
        self
    }

    /// Sets the quality tier.
    #[must_use]
    pub fn tier(mut self, tier: QualityTier) -> Self {
        self.envelope = self.envelope.tier(tier);
        self
    }

    /// Applies a transform to the envelope builder.
    #[must_use]
    pub fn envelope(mut self, f: impl FnOnce(EnvelopeBuilder) -> EnvelopeBuilder) -> Self {
        self.envelope = f(self.envelope);
        self
    }

    /// Finishes the packet.
    #[must_use]
    pub fn build(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::TaskDirective,
                LayerId::CognitiveControl,
                &self.correlation_id,
                created_at,
            ),
            mcp: Some(self.envelope.build()),
            payload: PacketPayload::TaskDirective(self.payload),
        }
    }
}

/// A TaskResult closing the given task.
#[must_use]
pub fn task_result(
    correlation_id: &str,
    task_id: &str,
    directive_packet_id: &str,
    status: TaskResultStatus,
    created_at: DateTime<Utc>,
) -> Packet {
    let error_details = match status {
        TaskResultStatus::Failure => Some("tool call failed".to_string()),
        TaskResultStatus::Success | TaskResultStatus::Cancelled => None,
    };
    let envelope = EnvelopeBuilder::new()
        .epistemics(EpistemicStatus::Observed, 0.9, FreshnessClass::Realtime)
        .evidence(Evidence::from_refs(vec![tool_evidence(
            &format!("ev_{task_id}"),
            created_at,
        )]))
        .build();
    Packet {
        header: header(
            PacketKind::TaskResult,
            LayerId::TaskProsecution,
            correlation_id,
            created_at,
        ),
        mcp: Some(envelope),
        payload: PacketPayload::TaskResult(TaskResultPayload {
            task_id: task_id.to_string(),
            directive_packet_id: directive_packet_id.to_string(),
            result_status: status,
            error_details,
            execution: Some(crate::packet::ExecutionMeta {
                duration_ms: Some(120),
                tool_calls: Some(1),
            }),
        }),
    }
}

/// Builder for ToolAuthorizationToken packets.
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    correlation_id: String,
    envelope: EnvelopeBuilder,
    payload: TokenPayload,
}

/// Starts a token builder with a single-use WRITE scope expiring an hour
/// after `t0`.
#[must_use]
pub fn token_builder(correlation_id: &str, token_id: &str) -> TokenBuilder {
    TokenBuilder {
        correlation_id: correlation_id.to_string(),
        envelope: EnvelopeBuilder::new().task_class(TaskClass::Create),
        payload: TokenPayload {
            token_id: token_id.to_string(),
            authorized_scope: AuthorizedScope {
                tool_ids: vec!["market_api".to_string()],
                operation_types: vec!["write".to_string()],
                resource_constraints: None,
            },
            expiry: at(3600),
            max_usage_count: 1,
            issuer_layer: LayerId::CognitiveControl,
            usage_count: 0,
            revoked: false,
            revoked_reason: None,
        },
    }
}

impl TokenBuilder {
    /// Sets the authorized tool ids and operation types.
    #[must_use]
    pub fn scope(mut self, tool_ids: &[&str], operation_types: &[&str]) -> Self {
        self.payload.authorized_scope = AuthorizedScope {
            tool_ids: tool_ids.iter().map(ToString::to_string).collect(),
            operation_types: operation_types.iter().map(ToString::to_string).collect(),
            resource_constraints: None,
        };
        self
    }

    /// Sets the expiry time.
    #[must_use]
    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.payload.expiry = expiry;
        self
    }

    /// Sets the usage ceiling.
    #[must_use]
    pub fn max_uses(mut self, max_usage_count: u32) -> Self {
        self.payload.max_usage_count = max_usage_count;
        self
    }

    /// Marks the token as revoked.
    #[must_use]
    pub fn revoked(mut self, reason: &str) -> Self {
        self.payload.revoked = true;
        self.payload.revoked_reason = Some(reason.to_string());
        self
    }

    /// Applies a transform to the envelope builder.
    #[must_use]
    pub fn envelope(mut self, f: impl FnOnce(EnvelopeBuilder) -> EnvelopeBuilder) -> Self {
        self.envelope = f(self.envelope);
        self
    }

    /// Finishes the packet.
    #[must_use]
    pub fn build(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::ToolAuthorizationToken,
                LayerId::CognitiveControl,
                &self.correlation_id,
                created_at,
            ),
            mcp: Some(self.envelope.build()),
            payload: PacketPayload::ToolAuthorizationToken(self.payload),
        }
    }
}

/// Builder for Escalation packets.
#[derive(Debug, Clone)]
pub struct EscalationBuilder {
    correlation_id: String,
    envelope: EnvelopeBuilder,
    payload: EscalationPayload,
}

/// Starts an Escalation builder with two options and one evidence gap.
#[must_use]
pub fn escalation_builder(correlation_id: &str) -> EscalationBuilder {
    EscalationBuilder {
        correlation_id: correlation_id.to_string(),
        envelope: EnvelopeBuilder::new(),
        payload: EscalationPayload {
            escalation_trigger: "uncertainty_above_threshold".to_string(),
            top_options: vec![
                EscalationOption {
                    option_id: "hold".to_string(),
                    description: "hold position and re-sense".to_string(),
                    pros: vec!["no irreversible action".to_string()],
                    cons: vec!["window may close".to_string()],
                },
                EscalationOption {
                    option_id: "proceed".to_string(),
                    description: "proceed with degraded evidence".to_string(),
                    pros: vec!["captures the window".to_string()],
                    cons: vec!["acts on stale data".to_string()],
                },
            ],
            evidence_gaps: vec!["no fresh reading for the key unknown".to_string()],
            recommended_next_step: "hold and request operator guidance".to_string(),
        },
    }
}

impl EscalationBuilder {
    /// Sets the escalation trigger.
    #[must_use]
    pub fn trigger(mut self, trigger: &str) -> Self {
        self.payload.escalation_trigger = trigger.to_string();
        self
    }

    /// Replaces the option list.
    #[must_use]
    pub fn options(mut self, options: Vec<EscalationOption>) -> Self {
        self.payload.top_options = options;
        self
    }

    /// Clears the evidence gaps (schema-invalid on purpose).
    #[must_use]
    pub fn no_gaps(mut self) -> Self {
        self.payload.evidence_gaps.clear();
        self
    }

    /// Sets the declared stakes level with consistent axes.
    #[must_use]
    pub fn stakes(mut self, level: StakesLevel) -> Self {
        self.envelope = self.envelope.stakes(level);
        self
    }

    /// Applies a transform to the envelope builder.
    #[must_use]
    pub fn envelope(mut self, f: impl FnOnce(EnvelopeBuilder) -> EnvelopeBuilder) -> Self {
        self.envelope = f(self.envelope);
        self
    }

    /// Finishes the packet.
    #[must_use]
    pub fn build(self, created_at: DateTime<Utc>) -> Packet {
        Packet {
            header: header(
                PacketKind::Escalation,
                LayerId::CognitiveControl,
                &self.correlation_id,
                created_at,
            ),
            mcp: Some(self.envelope.build()),
            payload: PacketPayload::Escalation(self.payload),
        }
    }
}

/// An IntegrityAlert packet.
#[must_use]
pub fn integrity_alert(
    correlation_id: &str,
    alert_type: &str,
    severity: AlertSeverity,
    created_at: DateTime<Utc>,
) -> Packet {
    Packet {
        header: header(
            PacketKind::IntegrityAlert,
            LayerId::Integrity,
            correlation_id,
            created_at,
        ),
        mcp: None,
        payload: PacketPayload::IntegrityAlert(IntegrityAlertPayload {
            alert_type: alert_type.to_string(),
            severity,
            message: format!("{alert_type} raised by fixture"),
        }),
    }
}
