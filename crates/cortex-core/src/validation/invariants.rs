//! Cross-policy invariant rules.
//!
//! Third validation gate: twelve deterministic rules evaluated over a
//! packet plus its episode ledger. Errors reject the packet; warnings are
//! admitted and logged. Rule numbering is part of the protocol surface
//! and appears verbatim in diagnostics.

use serde::{Deserialize, Serialize};

use crate::ledger::EpisodeLedger;
use crate::packet::{Packet, TRIGGER_BUDGET_INSUFFICIENT};
use crate::vocabulary::{
    DecisionOutcome, FreshnessClass, QualityTier, StakesLevel, ToolsState, UncertaintyLevel,
};

use super::result::{Diagnostic, InvariantCode};

/// The named tradeoff policies an arbitrated decision may cite.
pub const TRADEOFF_POLICIES: [&str; 4] =
    ["safety-first", "risk-adjusted", "min-regret", "expected-value"];

/// Freshness windows for the evidence-grounding rule.
///
/// The windows are deployment-configurable; the defaults below are the
/// protocol's (REALTIME 60 s, OPERATIONAL 3600 s). STRATEGIC and ARCHIVAL
/// claims are not subject to the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Maximum evidence age for REALTIME claims, in seconds.
    pub realtime_window_seconds: u64,
    /// Maximum evidence age for OPERATIONAL claims, in seconds.
    pub operational_window_seconds: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            realtime_window_seconds: 60,
            operational_window_seconds: 3600,
        }
    }
}

impl FreshnessConfig {
    /// The window for a freshness class, or `None` when the class is not
    /// subject to grounding.
    #[must_use]
    pub const fn window_seconds(&self, class: FreshnessClass) -> Option<u64> {
        match class {
            FreshnessClass::Realtime => Some(self.realtime_window_seconds),
            FreshnessClass::Operational => Some(self.operational_window_seconds),
            FreshnessClass::Strategic | FreshnessClass::Archival => None,
        }
    }
}

/// Evaluates all twelve rules for a packet against its ledger.
#[must_use]
pub fn evaluate(ledger: &EpisodeLedger, packet: &Packet) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    inv_001_mcp_completeness(packet, &mut diagnostics);
    inv_002_subpar_never_acts(packet, &mut diagnostics);
    inv_003_elevated_stakes_safety(packet, &mut diagnostics);
    inv_004_live_truth_grounding(ledger, packet, &mut diagnostics);
    inv_005_budget_overrun_approval(ledger, packet, &mut diagnostics);
    inv_006_arbitration_sequence(ledger, packet, &mut diagnostics);
    inv_007_write_token_scope(ledger, packet, &mut diagnostics);
    inv_008_verification_closure(ledger, packet, &mut diagnostics);
    inv_009_escalation_structure(packet, &mut diagnostics);
    inv_010_degraded_tools_policy(packet, &mut diagnostics);
    inv_011_task_closure(ledger, packet, &mut diagnostics);
    inv_012_stakes_consistency(packet, &mut diagnostics);

    diagnostics
}

/// INV-001: every consequential packet carries a complete MCP envelope,
/// and absent evidence is explained.
fn inv_001_mcp_completeness(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    if !packet.kind().is_consequential() {
        return;
    }
    let Some(envelope) = packet.envelope() else {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv001,
            "mcp",
            format!("{} packets require a complete MCP envelope", packet.kind()),
        ));
        return;
    };
    if envelope.evidence.evidence_refs.is_empty()
        && envelope.evidence.evidence_absent_reason.is_none()
    {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv001,
            "mcp.evidence.evidence_absent_reason",
            "empty evidence_refs require an evidence_absent_reason",
        ));
    }
}

/// INV-002: a SUBPAR-tier decision never ACTs.
fn inv_002_subpar_never_acts(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    let Some(decision) = packet.decision() else {
        return;
    };
    let Some(envelope) = packet.envelope() else {
        return;
    };
    if envelope.quality.tier == QualityTier::Subpar
        && decision.decision_outcome == DecisionOutcome::Act
    {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv002,
            "payload.decision_outcome",
            "SUBPAR tier cannot ACT; use VERIFY_FIRST, ESCALATE, DEFER, or CANCEL",
        ));
    }
}

/// INV-003: at HIGH/CRITICAL stakes a decision may only ACT when the tier
/// is SUPERB and every load-bearing assumption is verified; VERIFY_FIRST
/// and ESCALATE (and the non-acting DEFER/CANCEL) are always safe.
fn inv_003_elevated_stakes_safety(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    let Some(decision) = packet.decision() else {
        return;
    };
    let Some(envelope) = packet.envelope() else {
        return;
    };
    if !envelope.stakes.stakes_level.is_elevated()
        || decision.decision_outcome != DecisionOutcome::Act
    {
        return;
    }
    if envelope.quality.tier != QualityTier::Superb {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv003,
            "mcp.quality.tier",
            format!(
                "{:?} stakes with ACT require SUPERB tier, got {:?}",
                envelope.stakes.stakes_level, envelope.quality.tier
            ),
        ));
    }
    let unverified: Vec<&str> = decision
        .load_bearing_assumptions
        .iter()
        .filter(|a| !a.verified)
        .map(|a| a.assumption.as_str())
        .collect();
    if !unverified.is_empty() {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv003,
            "payload.load_bearing_assumptions",
            format!(
                "HIGH/CRITICAL ACT requires every load-bearing assumption verified; unverified: {}",
                unverified.join(", ")
            ),
        ));
    }
}

/// INV-004: ungrounded claims about live reality need fresh live
/// evidence.
fn inv_004_live_truth_grounding(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !packet.kind().is_consequential() {
        return;
    }
    let Some(envelope) = packet.envelope() else {
        return;
    };
    if !envelope.epistemics.status.is_ungrounded() {
        return;
    }
    let Some(default_window) = ledger
        .freshness()
        .window_seconds(envelope.epistemics.freshness_class)
    else {
        return;
    };
    let window = envelope
        .epistemics
        .stale_if_older_than_seconds
        .unwrap_or(default_window);

    let now = packet.header.created_at;
    let grounded = envelope.evidence.evidence_refs.iter().any(|evidence| {
        evidence.ref_type.is_live()
            && now.signed_duration_since(evidence.timestamp).num_seconds()
                <= i64::try_from(window).unwrap_or(i64::MAX)
    });
    if !grounded {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv004,
            "mcp.evidence.evidence_refs",
            format!(
                "{:?} claim at {:?} freshness needs tool_output or user_observation evidence no older than {window}s",
                envelope.epistemics.status, envelope.epistemics.freshness_class
            ),
        ));
    }
}

/// INV-005: once any budget axis is exceeded, the overrun must be
/// addressed (budget escalation or integrity override) before the next
/// consequential packet.
fn inv_005_budget_overrun_approval(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if !ledger.budgets().is_over_budget() || ledger.overrun_addressed() {
        return;
    }
    // The addressing packet itself is always admitted.
    if packet
        .escalation()
        .is_some_and(|e| e.escalation_trigger == TRIGGER_BUDGET_INSUFFICIENT)
    {
        return;
    }
    if !packet.kind().is_consequential() {
        return;
    }
    let overruns: Vec<String> = ledger
        .budgets()
        .overrun_axes()
        .iter()
        .map(ToString::to_string)
        .collect();
    diagnostics.push(Diagnostic::invariant_error(
        InvariantCode::Inv005,
        "mcp.budgets",
        format!(
            "budget overrun on {} requires a budget_insufficient escalation or integrity override before further consequential packets",
            overruns.join(", ")
        ),
    ));
}

/// INV-006: a decision following a recorded, unresolved conflict must
/// pass the constitutional and budget gates and cite a named tradeoff
/// policy.
fn inv_006_arbitration_sequence(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(decision) = packet.decision() else {
        return;
    };
    if ledger.unresolved_contradictions() == 0 {
        return;
    }
    if !decision.constraints_satisfied.constitutional_check {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv006,
            "payload.constraints_satisfied.constitutional_check",
            "post-conflict decisions must pass the constitutional check",
        ));
    }
    if !decision.constraints_satisfied.budget_check {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv006,
            "payload.constraints_satisfied.budget_check",
            "post-conflict decisions must pass the budget check",
        ));
    }
    let cites_policy = TRADEOFF_POLICIES
        .iter()
        .any(|policy| decision.decision_summary.contains(policy));
    if !cites_policy {
        diagnostics.push(Diagnostic::invariant_warning(
            InvariantCode::Inv006,
            "payload.decision_summary",
            format!(
                "post-conflict decisions should cite a tradeoff policy ({})",
                TRADEOFF_POLICIES.join(", ")
            ),
        ));
    }
}

/// INV-007: a WRITE/MIXED directive must reference a live token whose
/// scope covers the directive. The usage increment happens atomically
/// with admission.
fn inv_007_write_token_scope(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(directive) = packet.directive() else {
        return;
    };
    if !directive.safety_class().requires_authorization() {
        return;
    }
    if ledger.safe_mode() >= crate::ledger::SafeMode::Restricted {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.tool_safety_class",
            format!(
                "WRITE/MIXED directives are forbidden in {} safe mode",
                ledger.safe_mode()
            ),
        ));
    }
    // Schema guarantees the token id is present for WRITE/MIXED.
    let Some(token_id) = &directive.authorization_token_id else {
        return;
    };
    let Some(token) = ledger.token(token_id) else {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.authorization_token_id",
            format!("token {token_id} is not active in this episode"),
        ));
        return;
    };
    let now = packet.header.created_at;
    if token.revoked {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.authorization_token_id",
            format!(
                "token {token_id} was revoked: {}",
                token.revoked_reason.as_deref().unwrap_or("no reason recorded")
            ),
        ));
    }
    if now >= token.expiry {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.authorization_token_id",
            format!("token {token_id} expired at {}", token.expiry),
        ));
    }
    if token.usage_count >= token.max_usage_count {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.authorization_token_id",
            format!(
                "token {token_id} usage exhausted ({}/{})",
                token.usage_count, token.max_usage_count
            ),
        ));
    }
    let tool_id = directive.tool_id.as_deref().unwrap_or_default();
    let operation_type = directive.operation_type.as_deref().unwrap_or_default();
    if !token.scope.covers(tool_id, operation_type) {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.tool_id",
            format!(
                "token {token_id} scope does not cover tool {tool_id} operation {operation_type}"
            ),
        ));
    }
}

/// INV-008: leaving the verification loop requires the full closure set:
/// plan, READ directive, (tools OK) SUCCESS result, OBSERVED observation,
/// and a belief update referencing the collected evidence.
fn inv_008_verification_closure(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if ledger.current_state() != crate::vocabulary::FsmState::S4Verify {
        return;
    }
    if packet.belief_update().is_none() {
        return;
    }
    let Some(window) = ledger.verify_window() else {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv008,
            "payload",
            "no verification window is open for this episode",
        ));
        return;
    };

    let mut missing = Vec::new();
    if !window.plan_seen {
        missing.push("a VerificationPlan");
    }
    if !window.read_directive_seen {
        missing.push("a READ TaskDirective");
    }
    if window.tools_state == ToolsState::ToolsOk && !window.success_result_seen {
        missing.push("a SUCCESS TaskResult");
    }
    if !window.observed_observation_seen {
        missing.push("an OBSERVED Observation");
    }
    for item in &missing {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv008,
            "payload",
            format!("verification loop closure requires {item}"),
        ));
    }

    let references_window_evidence = packet.envelope().is_some_and(|envelope| {
        envelope
            .evidence
            .evidence_refs
            .iter()
            .any(|evidence| window.evidence_ids.contains(&evidence.ref_id))
    });
    if !references_window_evidence {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv008,
            "mcp.evidence.evidence_refs",
            "the closing BeliefUpdate must reference evidence collected during verification",
        ));
    }
}

/// INV-009: escalations present two or three structured options and name
/// their evidence gaps.
fn inv_009_escalation_structure(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    let Some(escalation) = packet.escalation() else {
        return;
    };
    let count = escalation.top_options.len();
    if !(2..=3).contains(&count) {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv009,
            "payload.top_options",
            format!("escalations present 2-3 options, got {count}"),
        ));
    }
    if escalation.evidence_gaps.is_empty() {
        diagnostics.push(Diagnostic::invariant_error(
            InvariantCode::Inv009,
            "payload.evidence_gaps",
            "escalations must name at least one evidence gap",
        ));
    }
}

/// INV-010: degraded tools gate high-stakes action.
fn inv_010_degraded_tools_policy(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    let Some(decision) = packet.decision() else {
        return;
    };
    let Some(envelope) = packet.envelope() else {
        return;
    };
    let stakes = envelope.stakes.stakes_level;
    match envelope.routing.tools_state {
        ToolsState::ToolsDown => {
            if stakes.is_elevated() && decision.decision_outcome == DecisionOutcome::Act {
                diagnostics.push(Diagnostic::invariant_error(
                    InvariantCode::Inv010,
                    "payload.decision_outcome",
                    "tools_down at HIGH/CRITICAL stakes forbids ACT",
                ));
            }
        },
        ToolsState::ToolsPartial => {
            if stakes == StakesLevel::Critical && decision.decision_outcome == DecisionOutcome::Act
            {
                diagnostics.push(Diagnostic::invariant_error(
                    InvariantCode::Inv010,
                    "payload.decision_outcome",
                    "tools_partial at CRITICAL stakes forbids ACT",
                ));
            }
            if stakes == StakesLevel::Medium
                && envelope.stakes.uncertainty != UncertaintyLevel::High
            {
                diagnostics.push(Diagnostic::invariant_warning(
                    InvariantCode::Inv010,
                    "mcp.stakes.uncertainty",
                    "tools_partial at MEDIUM stakes should declare HIGH uncertainty",
                ));
            }
        },
        ToolsState::ToolsOk => {},
    }
}

/// INV-011: results close a matching open directive; directives do not
/// reuse an open task id.
fn inv_011_task_closure(
    ledger: &EpisodeLedger,
    packet: &Packet,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let Some(result) = packet.task_result() {
        match ledger.open_directive(&result.task_id) {
            None => {
                diagnostics.push(Diagnostic::invariant_error(
                    InvariantCode::Inv011,
                    "payload.task_id",
                    format!("no open directive for task {}", result.task_id),
                ));
            },
            Some(directive) => {
                if directive.directive_packet_id != result.directive_packet_id {
                    diagnostics.push(Diagnostic::invariant_error(
                        InvariantCode::Inv011,
                        "payload.directive_packet_id",
                        format!(
                            "result names directive {} but task {} was opened by {}",
                            result.directive_packet_id, result.task_id, directive.directive_packet_id
                        ),
                    ));
                }
            },
        }
    }
    if let Some(directive) = packet.directive() {
        if ledger.open_directive(&directive.task_id).is_some() {
            diagnostics.push(Diagnostic::invariant_error(
                InvariantCode::Inv011,
                "payload.task_id",
                format!("task {} already has an open directive", directive.task_id),
            ));
        }
    }
}

/// INV-012: the declared stakes level must be supportable by the four
/// component axes. Violation is a warning.
fn inv_012_stakes_consistency(packet: &Packet, diagnostics: &mut Vec<Diagnostic>) {
    let Some(envelope) = packet.envelope() else {
        return;
    };
    if !envelope.stakes.level_is_supported() {
        diagnostics.push(Diagnostic::invariant_warning(
            InvariantCode::Inv012,
            "mcp.stakes.stakes_level",
            format!(
                "declared {:?} stakes are not supported by the component axes",
                envelope.stakes.stakes_level
            ),
        ));
    }
}

/// Convenience: true when any diagnostic is an error.
#[must_use]
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
