//! Per-kind packet payloads.
//!
//! Payloads are a tagged sum type dispatched on `header.packet_kind`; the
//! variants below carry only the fields the protocol defines for each kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vocabulary::{
    AlertSeverity, DecisionOutcome, LayerId, PacketKind, TaskResultStatus, ToolSafetyClass,
};

/// Payload of an Observation packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationPayload {
    /// What kind of observation this is (deployment-defined).
    pub observation_type: String,
    /// The observed data; must be non-empty.
    pub data: serde_json::Value,
    /// Tool that produced the observation, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tool: Option<String>,
    /// Reliability of the observation source in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
}

/// One belief revision inside a BeliefUpdate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefChange {
    /// Belief domain (e.g. `environment`, `capability`).
    pub domain: String,
    /// Key within the domain.
    pub key: String,
    /// The revised value.
    pub new_value: serde_json::Value,
    /// The value being replaced, when one existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_value: Option<serde_json::Value>,
}

/// Details of a resolved contradiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictionDetails {
    /// What contradicted what.
    pub description: String,
    /// Packets involved in the contradiction.
    #[serde(default)]
    pub conflicting_packet_ids: Vec<String>,
}

/// Update type marking a BeliefUpdate as a contradiction resolution; such
/// updates must carry `contradiction_details`.
pub const UPDATE_TYPE_CONTRADICTION_RESOLVED: &str = "contradiction_resolved";

/// Payload of a BeliefUpdate packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefUpdatePayload {
    /// What kind of update this is (e.g. `integration`,
    /// `contradiction_resolved`).
    pub update_type: String,
    /// The belief revisions; at least one is required.
    pub belief_changes: Vec<BeliefChange>,
    /// Present exactly when `update_type` is
    /// [`UPDATE_TYPE_CONTRADICTION_RESOLVED`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradiction_details: Option<ContradictionDetails>,
}

/// The three constraint gates a decision must report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintsSatisfied {
    /// Constitutional (Layer-1) gate.
    pub constitutional_check: bool,
    /// Budget feasibility gate.
    pub budget_check: bool,
    /// Quality tier gate.
    pub tier_check: bool,
}

/// An assumption whose falsification would flip the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBearingAssumption {
    /// The assumption text.
    pub assumption: String,
    /// Whether the assumption has been verified.
    pub verified: bool,
    /// Packet that verified the assumption, when verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_packet_id: Option<String>,
}

/// An option considered but not chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedOption {
    /// Identifier of the alternative.
    pub option_id: String,
    /// Brief description.
    pub summary: String,
    /// Why it was not chosen.
    pub rejection_reason: String,
}

/// Payload of a Decision packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPayload {
    /// The decision outcome.
    pub decision_outcome: DecisionOutcome,
    /// Human-readable summary; arbitrated decisions cite a tradeoff policy
    /// here.
    pub decision_summary: String,
    /// The three constraint gates.
    pub constraints_satisfied: ConstraintsSatisfied,
    /// Chosen option, when options were enumerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_option_id: Option<String>,
    /// Options considered and rejected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_options: Vec<RejectedOption>,
    /// Assumptions that would flip the decision if false.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_bearing_assumptions: Vec<LoadBearingAssumption>,
}

/// One item in a verification plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationItem {
    /// Identifier of the item within the plan.
    pub item_id: String,
    /// The claim to verify.
    pub claim: String,
    /// How it will be verified.
    pub method: String,
}

/// Payload of a VerificationPlan packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPlanPayload {
    /// Items to verify; at least one is required.
    pub items: Vec<VerificationItem>,
}

/// The scope a tool authorization token grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedScope {
    /// Tools the token authorizes; at least one is required.
    pub tool_ids: Vec<String>,
    /// Operation types the token authorizes; at least one is required.
    pub operation_types: Vec<String>,
    /// Richer constraints (monetary caps, target allowlists) are
    /// deployment plug-ins and carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_constraints: Option<serde_json::Value>,
}

impl AuthorizedScope {
    /// Returns true when the scope covers the given tool and operation.
    #[must_use]
    pub fn covers(&self, tool_id: &str, operation_type: &str) -> bool {
        self.tool_ids.iter().any(|t| t == tool_id)
            && self.operation_types.iter().any(|o| o == operation_type)
    }
}

/// Payload of a ToolAuthorizationToken packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token identifier (`token_<slug>`).
    pub token_id: String,
    /// What the token authorizes.
    pub authorized_scope: AuthorizedScope,
    /// Absolute expiry time.
    pub expiry: DateTime<Utc>,
    /// Maximum number of uses; at least 1.
    pub max_usage_count: u32,
    /// Layer that issued the token.
    pub issuer_layer: LayerId,
    /// Uses consumed so far; mutated by the ledger, monotonically
    /// increasing.
    #[serde(default)]
    pub usage_count: u32,
    /// Whether the token has been revoked.
    #[serde(default)]
    pub revoked: bool,
    /// Why the token was revoked, when revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

/// Payload of a TaskDirective packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDirectivePayload {
    /// Task identifier (`task_<slug>`); opens a pending entry in the
    /// ledger until a matching TaskResult lands.
    pub task_id: String,
    /// What kind of task this is (deployment-defined).
    pub task_type: String,
    /// How the task is to be executed.
    pub execution_method: String,
    /// Safety class of the tool use; WRITE/MIXED require a token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_safety_class: Option<ToolSafetyClass>,
    /// Tool the directive targets; required for WRITE/MIXED so token scope
    /// containment can be checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Operation type within the tool; required for WRITE/MIXED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Token authorizing the directive; required iff the safety class is
    /// WRITE or MIXED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_token_id: Option<String>,
    /// Deadline for a matching TaskResult, in seconds from `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl TaskDirectivePayload {
    /// Effective safety class; absent means READ.
    #[must_use]
    pub fn safety_class(&self) -> ToolSafetyClass {
        self.tool_safety_class.unwrap_or(ToolSafetyClass::Read)
    }
}

/// Execution metadata attached to a TaskResult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    /// Wall-clock duration of the execution in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Number of tool calls consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<u32>,
}

/// Payload of a TaskResult packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    /// Task this result closes.
    pub task_id: String,
    /// Packet id of the directive being closed.
    pub directive_packet_id: String,
    /// Outcome status.
    pub result_status: TaskResultStatus,
    /// Present exactly when `result_status` is FAILURE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    /// Optional execution metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionMeta>,
}

/// One option presented in an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOption {
    /// Identifier of the option.
    pub option_id: String,
    /// What the option entails.
    pub description: String,
    /// Arguments for.
    #[serde(default)]
    pub pros: Vec<String>,
    /// Arguments against.
    #[serde(default)]
    pub cons: Vec<String>,
}

/// Escalation trigger used when budgets are exhausted; INV-005 looks for
/// this spelling.
pub const TRIGGER_BUDGET_INSUFFICIENT: &str = "budget_insufficient";

/// Payload of an Escalation packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPayload {
    /// What triggered the escalation.
    pub escalation_trigger: String,
    /// Two or three options for the human to choose between.
    pub top_options: Vec<EscalationOption>,
    /// What evidence is missing; at least one entry is required.
    pub evidence_gaps: Vec<String>,
    /// The agent's recommendation.
    pub recommended_next_step: String,
}

/// Alert type used by the integrity overlay to approve a budget overrun;
/// INV-005 looks for this spelling.
pub const ALERT_TYPE_BUDGET_OVERRIDE: &str = "budget_override";

/// Payload of an IntegrityAlert packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityAlertPayload {
    /// What kind of alert this is (e.g. `budget_warning`,
    /// `budget_override`, `token_revoked`, `constitutional_veto`).
    pub alert_type: String,
    /// Severity; CRITICAL forces safe mode, INFO clears it.
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
}

/// The payload sum type, one variant per packet kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PacketPayload {
    /// Observation payload.
    Observation(ObservationPayload),
    /// BeliefUpdate payload.
    BeliefUpdate(BeliefUpdatePayload),
    /// Decision payload.
    Decision(DecisionPayload),
    /// VerificationPlan payload.
    VerificationPlan(VerificationPlanPayload),
    /// ToolAuthorizationToken payload.
    ToolAuthorizationToken(TokenPayload),
    /// TaskDirective payload.
    TaskDirective(TaskDirectivePayload),
    /// TaskResult payload.
    TaskResult(TaskResultPayload),
    /// Escalation payload.
    Escalation(EscalationPayload),
    /// IntegrityAlert payload.
    IntegrityAlert(IntegrityAlertPayload),
}

impl PacketPayload {
    /// Returns the packet kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Observation(_) => PacketKind::Observation,
            Self::BeliefUpdate(_) => PacketKind::BeliefUpdate,
            Self::Decision(_) => PacketKind::Decision,
            Self::VerificationPlan(_) => PacketKind::VerificationPlan,
            Self::ToolAuthorizationToken(_) => PacketKind::ToolAuthorizationToken,
            Self::TaskDirective(_) => PacketKind::TaskDirective,
            Self::TaskResult(_) => PacketKind::TaskResult,
            Self::Escalation(_) => PacketKind::Escalation,
            Self::IntegrityAlert(_) => PacketKind::IntegrityAlert,
        }
    }
}
