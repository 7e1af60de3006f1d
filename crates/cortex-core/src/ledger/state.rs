//! Ledger component state: budgets, tokens, directives, evidence,
//! assumptions, contradictions, and the verification window.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::{AuthorizedScope, EvidenceRef, TokenPayload};
use crate::vocabulary::{AlertSeverity, LayerId, ToolSafetyClass, ToolsState};

/// The four budget axes tracked per episode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAxis {
    /// Token spend.
    Tokens,
    /// Tool call count.
    ToolCalls,
    /// Wall-clock seconds.
    TimeSeconds,
    /// Risk spend against the risk envelope.
    Risk,
}

impl BudgetAxis {
    /// Returns the snake_case name of the axis.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tokens => "tokens",
            Self::ToolCalls => "tool_calls",
            Self::TimeSeconds => "time_seconds",
            Self::Risk => "risk",
        }
    }
}

impl std::fmt::Display for BudgetAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget allocation and cumulative usage for one episode.
///
/// Usage is monotonically increasing; there is no API to decrease it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    /// Allocated token budget.
    pub token_budget: u64,
    /// Allocated tool call budget.
    pub tool_call_budget: u64,
    /// Allocated time budget in seconds.
    pub time_budget_seconds: u64,
    /// Risk ceiling, when the risk budget's `max_loss` was numeric.
    pub risk_limit: Option<f64>,

    /// Tokens consumed.
    pub tokens_used: u64,
    /// Tool calls consumed.
    pub tool_calls_used: u64,
    /// Seconds consumed.
    pub time_seconds_used: u64,
    /// Risk consumed.
    pub risk_spent: f64,

    /// Axes for which an 80% warning event has already been emitted.
    pub(crate) warned_axes: BTreeSet<BudgetAxis>,
    /// Axes for which a 100% exceeded event has already been emitted.
    pub(crate) exceeded_axes: BTreeSet<BudgetAxis>,
}

impl BudgetState {
    /// Creates a budget state from allocations.
    #[must_use]
    pub fn new(
        token_budget: u64,
        tool_call_budget: u64,
        time_budget_seconds: u64,
        risk_limit: Option<f64>,
    ) -> Self {
        Self {
            token_budget,
            tool_call_budget,
            time_budget_seconds,
            risk_limit,
            tokens_used: 0,
            tool_calls_used: 0,
            time_seconds_used: 0,
            risk_spent: 0.0,
            warned_axes: BTreeSet::new(),
            exceeded_axes: BTreeSet::new(),
        }
    }

    /// Records consumption on the three discrete axes.
    pub fn consume(&mut self, tokens: u64, tool_calls: u64, time_seconds: u64) {
        self.tokens_used += tokens;
        self.tool_calls_used += tool_calls;
        self.time_seconds_used += time_seconds;
    }

    /// Records risk spend.
    pub fn spend_risk(&mut self, amount: f64) {
        self.risk_spent += amount;
    }

    /// Consumption ratio for an axis, or `None` when the axis is
    /// unbudgeted (zero/absent allocation).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self, axis: BudgetAxis) -> Option<f64> {
        match axis {
            BudgetAxis::Tokens if self.token_budget > 0 => {
                Some(self.tokens_used as f64 / self.token_budget as f64)
            },
            BudgetAxis::ToolCalls if self.tool_call_budget > 0 => {
                Some(self.tool_calls_used as f64 / self.tool_call_budget as f64)
            },
            BudgetAxis::TimeSeconds if self.time_budget_seconds > 0 => {
                Some(self.time_seconds_used as f64 / self.time_budget_seconds as f64)
            },
            BudgetAxis::Risk => self
                .risk_limit
                .filter(|limit| *limit > 0.0)
                .map(|limit| self.risk_spent / limit),
            _ => None,
        }
    }

    /// Axes whose cumulative usage exceeds the allocation.
    #[must_use]
    pub fn overrun_axes(&self) -> Vec<BudgetAxis> {
        [
            BudgetAxis::Tokens,
            BudgetAxis::ToolCalls,
            BudgetAxis::TimeSeconds,
            BudgetAxis::Risk,
        ]
        .into_iter()
        .filter(|axis| self.ratio(*axis).is_some_and(|r| r > 1.0))
        .collect()
    }

    /// Returns true when any axis is over budget.
    #[must_use]
    pub fn is_over_budget(&self) -> bool {
        !self.overrun_axes().is_empty()
    }
}

/// A live authorization token held in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveToken {
    /// Token identifier.
    pub token_id: String,
    /// What the token authorizes.
    pub scope: AuthorizedScope,
    /// Absolute expiry.
    pub expiry: DateTime<Utc>,
    /// Usage ceiling.
    pub max_usage_count: u32,
    /// Uses consumed; monotonically increasing.
    pub usage_count: u32,
    /// Whether the token has been revoked.
    pub revoked: bool,
    /// Revocation reason, when revoked.
    pub revoked_reason: Option<String>,
    /// Layer that issued the token.
    pub issuer_layer: LayerId,
}

impl ActiveToken {
    /// Builds the ledger entry from a token packet payload.
    #[must_use]
    pub fn from_payload(payload: &TokenPayload) -> Self {
        Self {
            token_id: payload.token_id.clone(),
            scope: payload.authorized_scope.clone(),
            expiry: payload.expiry,
            max_usage_count: payload.max_usage_count,
            usage_count: payload.usage_count,
            revoked: payload.revoked,
            revoked_reason: payload.revoked_reason.clone(),
            issuer_layer: payload.issuer_layer,
        }
    }

    /// Returns true when the token can authorize one more use at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expiry && self.usage_count < self.max_usage_count
    }

    /// Marks the token revoked.
    pub fn revoke(&mut self, reason: impl Into<String>) {
        self.revoked = true;
        self.revoked_reason = Some(reason.into());
    }
}

/// A directive awaiting its matching result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDirective {
    /// Task identifier.
    pub task_id: String,
    /// Packet id of the directive.
    pub directive_packet_id: String,
    /// When the directive was admitted.
    pub created_at: DateTime<Utc>,
    /// Deadline for the matching result, seconds from `created_at`.
    pub timeout_seconds: Option<u64>,
    /// Safety class of the directive.
    pub safety: ToolSafetyClass,
    /// Whether a timeout event has already been emitted for this entry.
    pub timed_out: bool,
}

impl OpenDirective {
    /// Absolute deadline, when a timeout is configured.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.timeout_seconds
            .map(|secs| self.created_at + Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }
}

/// An evidence reference recorded in the episode's evidence index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    /// The reference itself.
    pub evidence: EvidenceRef,
    /// Packet that carried the reference.
    pub source_packet_id: String,
    /// When the carrying packet was admitted.
    pub recorded_at: DateTime<Utc>,
}

/// An assumption tracked for the episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumptionEntry {
    /// The assumption text.
    pub text: String,
    /// Whether falsifying it would flip a decision.
    pub load_bearing: bool,
    /// Whether it has been verified.
    pub verified: bool,
    /// Packet that verified it, when verified.
    pub verification_packet_id: Option<String>,
    /// Packet that introduced it.
    pub source_packet_id: String,
}

/// An unresolved (or resolved) contradiction marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictionEntry {
    /// What contradicted what.
    pub description: String,
    /// Packet that raised the contradiction.
    pub raised_by_packet_id: String,
    /// Whether a resolution update has landed.
    pub resolved: bool,
}

/// Tracking for an in-flight verification loop (`S4_VERIFY`).
///
/// Opened by a `VERIFY_FIRST` decision, closed by the belief update that
/// leaves `S4_VERIFY`; the closure invariant reads these flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyWindow {
    /// Decision packet that opened the loop.
    pub decision_packet_id: String,
    /// Tools state when the loop opened; gates the SUCCESS-result
    /// requirement.
    pub tools_state: ToolsState,
    /// A verification plan has been admitted.
    pub plan_seen: bool,
    /// At least one READ directive has been admitted.
    pub read_directive_seen: bool,
    /// At least one SUCCESS result has been admitted.
    pub success_result_seen: bool,
    /// At least one OBSERVED-status observation has been admitted.
    pub observed_observation_seen: bool,
    /// Evidence ref ids collected during the loop.
    pub evidence_ids: BTreeSet<String>,
}

impl VerifyWindow {
    /// Opens a window for the given decision.
    #[must_use]
    pub fn open(decision_packet_id: impl Into<String>, tools_state: ToolsState) -> Self {
        Self {
            decision_packet_id: decision_packet_id.into(),
            tools_state,
            plan_seen: false,
            read_directive_seen: false,
            success_result_seen: false,
            observed_observation_seen: false,
            evidence_ids: BTreeSet::new(),
        }
    }
}

/// Safe-mode ladder for an episode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafeMode {
    /// Full operation.
    Normal,
    /// Verify everything.
    Cautious,
    /// No write operations.
    Restricted,
    /// No execution; maps to FSM `S9_SAFEMODE`.
    Halted,
}

impl SafeMode {
    /// Returns the wire spelling of this mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Cautious => "CAUTIOUS",
            Self::Restricted => "RESTRICTED",
            Self::Halted => "HALTED",
        }
    }
}

impl std::fmt::Display for SafeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event produced by ledger mutation, consumed by the runner and the
/// integrity overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A budget axis crossed the warning (80%) or exceeded (100%)
    /// threshold.
    BudgetThreshold {
        /// The axis that crossed.
        axis: BudgetAxis,
        /// Consumption ratio at emission time.
        ratio: f64,
        /// WARNING at 80%, HIGH at 100% (CRITICAL for critical-stakes
        /// episodes).
        severity: AlertSeverity,
    },
    /// An open directive passed its deadline without a matching result.
    DirectiveTimeout {
        /// The orphaned task.
        task_id: String,
        /// The directive packet.
        directive_packet_id: String,
        /// The deadline that passed.
        deadline: DateTime<Utc>,
    },
    /// A token was revoked through the control queue.
    TokenRevoked {
        /// The revoked token.
        token_id: String,
        /// Why it was revoked.
        reason: String,
    },
    /// The safe mode changed through the control queue.
    SafeModeChanged {
        /// The new mode.
        mode: SafeMode,
        /// Why it changed.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_budget_ratio_unbudgeted_axis_is_none() {
        let budget = BudgetState::new(0, 5, 0, None);
        assert!(budget.ratio(BudgetAxis::Tokens).is_none());
        assert!(budget.ratio(BudgetAxis::TimeSeconds).is_none());
        assert!(budget.ratio(BudgetAxis::Risk).is_none());
        assert_eq!(budget.ratio(BudgetAxis::ToolCalls), Some(0.0));
    }

    #[test]
    fn test_budget_overrun_detection() {
        let mut budget = BudgetState::new(100, 2, 60, None);
        assert!(!budget.is_over_budget());

        budget.consume(101, 0, 0);
        assert_eq!(budget.overrun_axes(), vec![BudgetAxis::Tokens]);

        budget.consume(0, 3, 61);
        let axes = budget.overrun_axes();
        assert!(axes.contains(&BudgetAxis::ToolCalls));
        assert!(axes.contains(&BudgetAxis::TimeSeconds));
    }

    #[test]
    fn test_budget_exactly_at_limit_is_not_overrun() {
        let mut budget = BudgetState::new(100, 0, 0, None);
        budget.consume(100, 0, 0);
        assert!(!budget.is_over_budget());
        budget.consume(1, 0, 0);
        assert!(budget.is_over_budget());
    }

    #[test]
    fn test_token_usability() {
        let mut token = ActiveToken {
            token_id: "token_t".to_string(),
            scope: AuthorizedScope {
                tool_ids: vec!["market_api".to_string()],
                operation_types: vec!["write".to_string()],
                resource_constraints: None,
            },
            expiry: t0() + Duration::hours(1),
            max_usage_count: 1,
            usage_count: 0,
            revoked: false,
            revoked_reason: None,
            issuer_layer: LayerId::CognitiveControl,
        };
        assert!(token.is_usable_at(t0()));
        assert!(!token.is_usable_at(t0() + Duration::hours(2)));

        token.usage_count = 1;
        assert!(!token.is_usable_at(t0()));

        token.usage_count = 0;
        token.revoke("constitutional veto");
        assert!(!token.is_usable_at(t0()));
        assert_eq!(token.revoked_reason.as_deref(), Some("constitutional veto"));
    }

    #[test]
    fn test_directive_deadline() {
        let directive = OpenDirective {
            task_id: "task_v1".to_string(),
            directive_packet_id: "pkt_d".to_string(),
            created_at: t0(),
            timeout_seconds: Some(60),
            safety: ToolSafetyClass::Read,
            timed_out: false,
        };
        assert_eq!(directive.deadline(), Some(t0() + Duration::seconds(60)));

        let no_deadline = OpenDirective {
            timeout_seconds: None,
            ..directive
        };
        assert!(no_deadline.deadline().is_none());
    }

    #[test]
    fn test_safe_mode_ordering() {
        assert!(SafeMode::Normal < SafeMode::Cautious);
        assert!(SafeMode::Restricted < SafeMode::Halted);
    }
}
