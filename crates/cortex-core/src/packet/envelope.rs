//! The policy-compliance envelope carried by every consequential packet.
//!
//! The envelope is the structural gate between cognition and action: a
//! Decision, TaskDirective, ToolAuthorizationToken, or Escalation without a
//! complete envelope is rejected before any other validation runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vocabulary::{
    Adversariality, EpistemicStatus, EvidenceRefType, FreshnessClass, ImpactLevel,
    Irreversibility, QualityTier, StakesLevel, TaskClass, ToolsState, UncertaintyLevel,
    VerificationRequirement,
};

/// What the packet is trying to accomplish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Brief description of the intent.
    pub summary: String,
    /// Scope the intent applies to.
    pub scope: String,
}

/// Stakes classification across four axes plus the aggregate level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakes {
    /// Magnitude of potential impact.
    pub impact: ImpactLevel,
    /// Degree to which the action can be undone.
    pub irreversibility: Irreversibility,
    /// Degree of uncertainty about outcomes.
    pub uncertainty: UncertaintyLevel,
    /// Environmental threat level.
    pub adversariality: Adversariality,
    /// Declared aggregate level; must be supportable by the four axes.
    pub stakes_level: StakesLevel,
}

impl Stakes {
    /// Stakes with component axes that support the declared level.
    #[must_use]
    pub const fn consistent(level: StakesLevel) -> Self {
        let (impact, irreversibility, uncertainty, adversariality) = match level {
            StakesLevel::Low => (
                ImpactLevel::Low,
                Irreversibility::Reversible,
                UncertaintyLevel::Low,
                Adversariality::Benign,
            ),
            StakesLevel::Medium => (
                ImpactLevel::Medium,
                Irreversibility::Reversible,
                UncertaintyLevel::Medium,
                Adversariality::Benign,
            ),
            StakesLevel::High => (
                ImpactLevel::High,
                Irreversibility::Reversible,
                UncertaintyLevel::High,
                Adversariality::Benign,
            ),
            StakesLevel::Critical => (
                ImpactLevel::Critical,
                Irreversibility::Irreversible,
                UncertaintyLevel::High,
                Adversariality::Contested,
            ),
        };
        Self {
            impact,
            irreversibility,
            uncertainty,
            adversariality,
            stakes_level: level,
        }
    }

    /// Returns the number of axes at a HIGH-equivalent reading.
    fn high_axes(&self) -> usize {
        usize::from(self.impact >= ImpactLevel::High)
            + usize::from(self.irreversibility == Irreversibility::Irreversible)
            + usize::from(self.uncertainty == UncertaintyLevel::High)
            + usize::from(self.adversariality == Adversariality::Hostile)
    }

    /// Returns the number of axes at a MEDIUM-or-above reading.
    fn medium_axes(&self) -> usize {
        usize::from(self.impact >= ImpactLevel::Medium)
            + usize::from(self.irreversibility >= Irreversibility::Partial)
            + usize::from(self.uncertainty >= UncertaintyLevel::Medium)
            + usize::from(self.adversariality >= Adversariality::Contested)
    }

    /// Checks whether the declared `stakes_level` is supportable by the
    /// four component axes:
    ///
    /// - CRITICAL: any axis CRITICAL, or impact HIGH with irreversible
    ///   action.
    /// - HIGH: two axes at HIGH, or one at CRITICAL.
    /// - MEDIUM: at least one axis at MEDIUM or HIGH.
    /// - LOW: no axis above MEDIUM.
    #[must_use]
    pub fn level_is_supported(&self) -> bool {
        match self.stakes_level {
            StakesLevel::Critical => {
                self.impact == ImpactLevel::Critical
                    || (self.impact >= ImpactLevel::High
                        && self.irreversibility == Irreversibility::Irreversible)
            },
            StakesLevel::High => self.high_axes() >= 2 || self.impact == ImpactLevel::Critical,
            StakesLevel::Medium => self.medium_axes() >= 1,
            StakesLevel::Low => self.high_axes() == 0,
        }
    }
}

/// Success criteria for the work the packet commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionOfDone {
    /// Human-readable definition of done.
    pub text: String,
    /// Specific checkable criteria; at least one is required.
    pub checks: Vec<String>,
}

/// Quality tier and verification requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    /// Required quality tier.
    pub tier: QualityTier,
    /// If true, good-enough is acceptable.
    pub satisficing_mode: bool,
    /// Success criteria.
    pub definition_of_done: DefinitionOfDone,
    /// How much verification is required before acting.
    pub verification_requirement: VerificationRequirement,
}

/// Risk exposure limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBudget {
    /// Risk envelope identifier or description.
    pub envelope: String,
    /// Maximum acceptable loss; deployment-specific unit, so the value is
    /// carried opaquely.
    pub max_loss: serde_json::Value,
}

/// Resource budget constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    /// Maximum tokens to spend.
    pub token_budget: u64,
    /// Maximum tool calls allowed.
    pub tool_call_budget: u64,
    /// Maximum wall-clock seconds.
    pub time_budget_seconds: u64,
    /// Risk exposure limits.
    pub risk_budget: RiskBudget,
}

/// Epistemic status and confidence of the packet's claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epistemics {
    /// How the claim is known.
    pub status: EpistemicStatus,
    /// Confidence score in `[0, 1]`.
    pub confidence: f64,
    /// Explanation of the confidence assessment.
    pub calibration_note: String,
    /// Temporal validity classification.
    pub freshness_class: FreshnessClass,
    /// Optional per-packet override of the freshness window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_if_older_than_seconds: Option<u64>,
    /// Explicit assumptions underlying the claim.
    #[serde(default)]
    pub assumptions: Vec<String>,
}

/// Reference to evidence backing a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Type of evidence.
    pub ref_type: EvidenceRefType,
    /// Unique identifier of the evidence item.
    pub ref_id: String,
    /// When the evidence was captured.
    pub timestamp: DateTime<Utc>,
    /// Optional reliability assessment in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability_score: Option<f64>,
}

/// Evidence backing the packet's claims.
///
/// Exactly one of `evidence_refs` (non-empty) or `evidence_absent_reason`
/// must be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// References to supporting evidence.
    #[serde(default)]
    pub evidence_refs: Vec<EvidenceRef>,
    /// Explanation when evidence is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_absent_reason: Option<String>,
}

impl Evidence {
    /// Evidence with at least one reference.
    #[must_use]
    pub fn from_refs(refs: Vec<EvidenceRef>) -> Self {
        Self {
            evidence_refs: refs,
            evidence_absent_reason: None,
        }
    }

    /// Evidence explicitly absent, with a reason.
    #[must_use]
    pub fn absent(reason: impl Into<String>) -> Self {
        Self {
            evidence_refs: Vec::new(),
            evidence_absent_reason: Some(reason.into()),
        }
    }
}

/// Task routing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Semantic task classification.
    pub task_class: TaskClass,
    /// Current tool availability.
    pub tools_state: ToolsState,
}

/// The complete policy envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpEnvelope {
    /// What the packet is trying to accomplish.
    pub intent: Intent,
    /// Stakes classification.
    pub stakes: Stakes,
    /// Quality tier and verification requirements.
    pub quality: Quality,
    /// Resource budgets.
    pub budgets: Budgets,
    /// Epistemic status of the claims.
    pub epistemics: Epistemics,
    /// Evidence backing the claims.
    pub evidence: Evidence,
    /// Task routing.
    pub routing: Routing,
}
