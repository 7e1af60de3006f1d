//! Closed vocabulary shared by packets, policies, and validators.
//!
//! Every enumeration in the protocol is closed: wire values outside the
//! listed spellings are rejected at parse time rather than carried as
//! opaque strings. The `as_str`/`parse` pairs below are the single source
//! of truth for wire spellings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a wire value does not belong to a closed vocabulary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VocabularyError {
    /// The value is not a member of the named enumeration.
    #[error("unknown {enum_name} value: {value}")]
    UnknownValue {
        /// Name of the enumeration being parsed.
        enum_name: &'static str,
        /// The offending wire value.
        value: String,
    },
}

impl VocabularyError {
    fn unknown(enum_name: &'static str, value: &str) -> Self {
        Self::UnknownValue {
            enum_name,
            value: value.to_string(),
        }
    }
}

/// The nine canonical packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// Grounded reading of external reality.
    Observation,
    /// World-model revision.
    BeliefUpdate,
    /// Deliberation outcome.
    Decision,
    /// Plan for a verification loop.
    VerificationPlan,
    /// Authorization for WRITE/MIXED tool use.
    ToolAuthorizationToken,
    /// Execution command for the task-prosecution layer.
    TaskDirective,
    /// Closure of a task directive.
    TaskResult,
    /// Hand-off to a human with options and gaps.
    Escalation,
    /// Alert from the integrity overlay.
    IntegrityAlert,
}

impl PacketKind {
    /// Returns the wire spelling of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "Observation",
            Self::BeliefUpdate => "BeliefUpdate",
            Self::Decision => "Decision",
            Self::VerificationPlan => "VerificationPlan",
            Self::ToolAuthorizationToken => "ToolAuthorizationToken",
            Self::TaskDirective => "TaskDirective",
            Self::TaskResult => "TaskResult",
            Self::Escalation => "Escalation",
            Self::IntegrityAlert => "IntegrityAlert",
        }
    }

    /// Parses a packet kind from its wire spelling.
    ///
    /// # Errors
    ///
    /// Returns `VocabularyError::UnknownValue` for any other string.
    pub fn parse(s: &str) -> Result<Self, VocabularyError> {
        match s {
            "Observation" => Ok(Self::Observation),
            "BeliefUpdate" => Ok(Self::BeliefUpdate),
            "Decision" => Ok(Self::Decision),
            "VerificationPlan" => Ok(Self::VerificationPlan),
            "ToolAuthorizationToken" => Ok(Self::ToolAuthorizationToken),
            "TaskDirective" => Ok(Self::TaskDirective),
            "TaskResult" => Ok(Self::TaskResult),
            "Escalation" => Ok(Self::Escalation),
            "IntegrityAlert" => Ok(Self::IntegrityAlert),
            other => Err(VocabularyError::unknown("PacketKind", other)),
        }
    }

    /// Returns true for kinds that can change external state or commit the
    /// agent to action, and therefore must carry a policy envelope.
    #[must_use]
    pub const fn is_consequential(&self) -> bool {
        matches!(
            self,
            Self::Decision | Self::TaskDirective | Self::ToolAuthorizationToken | Self::Escalation
        )
    }

    /// Returns true for telemetry kinds carried on the northbound bus.
    #[must_use]
    pub const fn is_northbound(&self) -> bool {
        matches!(
            self,
            Self::Observation
                | Self::TaskResult
                | Self::BeliefUpdate
                | Self::Escalation
                | Self::IntegrityAlert
        )
    }

    /// Returns true for directive kinds carried on the southbound bus.
    #[must_use]
    pub const fn is_southbound(&self) -> bool {
        matches!(
            self,
            Self::Decision | Self::VerificationPlan | Self::ToolAuthorizationToken | Self::TaskDirective
        )
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Episode state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsmState {
    /// No episode activity.
    #[serde(rename = "S0_IDLE")]
    S0Idle,
    /// Gathering observations.
    #[serde(rename = "S1_SENSE")]
    S1Sense,
    /// Revising the world model.
    #[serde(rename = "S2_MODEL")]
    S2Model,
    /// Deliberating.
    #[serde(rename = "S3_DECIDE")]
    S3Decide,
    /// Running a verification loop before acting.
    #[serde(rename = "S4_VERIFY")]
    S4Verify,
    /// Awaiting a tool authorization token.
    #[serde(rename = "S5_AUTHORIZE")]
    S5Authorize,
    /// Executing task directives.
    #[serde(rename = "S6_EXECUTE")]
    S6Execute,
    /// Reviewing results.
    #[serde(rename = "S7_REVIEW")]
    S7Review,
    /// Escalated to a human.
    #[serde(rename = "S8_ESCALATED")]
    S8Escalated,
    /// Halted by the integrity overlay.
    #[serde(rename = "S9_SAFEMODE")]
    S9Safemode,
}

impl FsmState {
    /// Returns the wire spelling of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::S0Idle => "S0_IDLE",
            Self::S1Sense => "S1_SENSE",
            Self::S2Model => "S2_MODEL",
            Self::S3Decide => "S3_DECIDE",
            Self::S4Verify => "S4_VERIFY",
            Self::S5Authorize => "S5_AUTHORIZE",
            Self::S6Execute => "S6_EXECUTE",
            Self::S7Review => "S7_REVIEW",
            Self::S8Escalated => "S8_ESCALATED",
            Self::S9Safemode => "S9_SAFEMODE",
        }
    }

    /// Parses a state from its wire spelling.
    ///
    /// # Errors
    ///
    /// Returns `VocabularyError::UnknownValue` for any other string.
    pub fn parse(s: &str) -> Result<Self, VocabularyError> {
        match s {
            "S0_IDLE" => Ok(Self::S0Idle),
            "S1_SENSE" => Ok(Self::S1Sense),
            "S2_MODEL" => Ok(Self::S2Model),
            "S3_DECIDE" => Ok(Self::S3Decide),
            "S4_VERIFY" => Ok(Self::S4Verify),
            "S5_AUTHORIZE" => Ok(Self::S5Authorize),
            "S6_EXECUTE" => Ok(Self::S6Execute),
            "S7_REVIEW" => Ok(Self::S7Review),
            "S8_ESCALATED" => Ok(Self::S8Escalated),
            "S9_SAFEMODE" => Ok(Self::S9Safemode),
            other => Err(VocabularyError::unknown("FsmState", other)),
        }
    }

    /// Returns true when the episode has an established world model, i.e.
    /// the state is at or past `S2_MODEL` in the cognitive flow.
    #[must_use]
    pub const fn model_established(&self) -> bool {
        !matches!(self, Self::S0Idle | Self::S1Sense)
    }
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magnitude of potential impact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    /// Negligible consequences.
    Low,
    /// Noticeable but contained consequences.
    Medium,
    /// Significant consequences.
    High,
    /// Severe or systemic consequences.
    Critical,
}

/// Degree to which an action can be undone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Irreversibility {
    /// Fully undoable.
    Reversible,
    /// Partially undoable.
    Partial,
    /// Cannot be undone.
    Irreversible,
}

/// Degree of uncertainty about outcomes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UncertaintyLevel {
    /// Outcomes well understood.
    Low,
    /// Moderate unknowns.
    Medium,
    /// Major unknowns.
    High,
}

/// Environmental threat level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Adversariality {
    /// No opposition expected.
    Benign,
    /// Some opposition or volatility.
    Contested,
    /// Active opposition.
    Hostile,
}

/// Aggregate stakes classification derived from the four axes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StakesLevel {
    /// Routine.
    Low,
    /// Elevated.
    Medium,
    /// Serious.
    High,
    /// Existential or irreversible.
    Critical,
}

impl StakesLevel {
    /// Returns true for the HIGH and CRITICAL levels, which gate action.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Required quality tier for an output.
///
/// SUBPAR outputs never authorize external action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    /// Speculative or informational only.
    Subpar,
    /// Good enough for routine action.
    Par,
    /// Verified to the highest standard.
    Superb,
}

/// How much verification is required before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationRequirement {
    /// Verification optional.
    Optional,
    /// Verify at least one load-bearing assumption.
    VerifyOne,
    /// Verify every load-bearing assumption.
    VerifyAll,
}

/// Classification of how a claim is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpistemicStatus {
    /// From a tool or sensor read, or direct user observation.
    Observed,
    /// Deterministic computation from known inputs.
    Derived,
    /// From persistent memory or cache.
    Remembered,
    /// Logical or probabilistic conclusion.
    Inferred,
    /// Candidate explanation not yet believed.
    Hypothesized,
    /// Cannot answer or justify.
    Unknown,
}

impl EpistemicStatus {
    /// Returns true for statuses that do not rest on direct observation and
    /// therefore need fresh evidence before live-truth claims.
    #[must_use]
    pub const fn is_ungrounded(&self) -> bool {
        matches!(self, Self::Inferred | Self::Hypothesized | Self::Unknown)
    }
}

/// Temporal validity classification for observations and memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreshnessClass {
    /// Valid for seconds to minutes.
    Realtime,
    /// Valid for minutes to hours.
    Operational,
    /// Valid for hours to days.
    Strategic,
    /// Valid for days to months.
    Archival,
}

/// Type of evidence reference backing a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRefType {
    /// Output of a tool execution.
    ToolOutput,
    /// Direct report from the user.
    UserObservation,
    /// Item retrieved from memory.
    MemoryItem,
    /// Deterministic calculation over other evidence.
    DerivedCalc,
}

impl EvidenceRefType {
    /// Returns true for evidence grounded in external reality, as opposed
    /// to memory or derivation.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::ToolOutput | Self::UserObservation)
    }
}

/// Possible outcomes of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    /// Gather evidence before acting.
    VerifyFirst,
    /// Proceed with action.
    Act,
    /// Hand off to a human.
    Escalate,
    /// Postpone.
    Defer,
    /// Abandon the line of action.
    Cancel,
}

/// Outcome status of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    /// Task completed as directed.
    Success,
    /// Task failed.
    Failure,
    /// Task was cancelled before completion.
    Cancelled,
}

/// Safety classification of tool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolSafetyClass {
    /// No side effects.
    Read,
    /// Side effects; requires an authorization token.
    Write,
    /// May have side effects depending on parameters; treated as WRITE.
    Mixed,
}

impl ToolSafetyClass {
    /// Returns true when this class requires an authorization token.
    #[must_use]
    pub const fn requires_authorization(&self) -> bool {
        matches!(self, Self::Write | Self::Mixed)
    }
}

/// Semantic classification of task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskClass {
    /// Locate something whose existence is uncertain.
    Find,
    /// Retrieve a known datum.
    Lookup,
    /// Broad exploration.
    Search,
    /// Produce an artifact or effect.
    Create,
    /// Check a claim.
    Verify,
    /// Transform a described design into an artifact.
    Compile,
}

/// Current availability of external tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolsState {
    /// All tools available.
    #[serde(rename = "tools_ok")]
    ToolsOk,
    /// Some tools unavailable.
    #[serde(rename = "tools_partial")]
    ToolsPartial,
    /// No tools available.
    #[serde(rename = "tools_down")]
    ToolsDown,
}

impl ToolsState {
    /// Returns the wire spelling of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ToolsOk => "tools_ok",
            Self::ToolsPartial => "tools_partial",
            Self::ToolsDown => "tools_down",
        }
    }
}

impl std::fmt::Display for ToolsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integrity alert severity levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational; also used to clear safe mode.
    Info,
    /// Attention needed.
    Warning,
    /// Serious condition.
    High,
    /// Triggers safe mode.
    Critical,
}

/// Identifier of a cognitive layer, or the integrity overlay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LayerId {
    /// Aspirational: law, posture, vetoes.
    #[serde(rename = "1")]
    Aspirational,
    /// Global strategy.
    #[serde(rename = "2")]
    Strategy,
    /// Agent self-model: capability truth, tools state.
    #[serde(rename = "3")]
    SelfModel,
    /// Executive function: budgets, feasibility.
    #[serde(rename = "4")]
    Executive,
    /// Cognitive control: decisions, tokens, directives.
    #[serde(rename = "5")]
    CognitiveControl,
    /// Task prosecution: execution and grounding.
    #[serde(rename = "6")]
    TaskProsecution,
    /// The integrity overlay (not a cognitive layer).
    #[serde(rename = "integrity")]
    Integrity,
}

impl LayerId {
    /// Returns the wire spelling of this identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aspirational => "1",
            Self::Strategy => "2",
            Self::SelfModel => "3",
            Self::Executive => "4",
            Self::CognitiveControl => "5",
            Self::TaskProsecution => "6",
            Self::Integrity => "integrity",
        }
    }

    /// Parses a layer identifier from its wire spelling.
    ///
    /// # Errors
    ///
    /// Returns `VocabularyError::UnknownValue` for any other string.
    pub fn parse(s: &str) -> Result<Self, VocabularyError> {
        match s {
            "1" => Ok(Self::Aspirational),
            "2" => Ok(Self::Strategy),
            "3" => Ok(Self::SelfModel),
            "4" => Ok(Self::Executive),
            "5" => Ok(Self::CognitiveControl),
            "6" => Ok(Self::TaskProsecution),
            "integrity" => Ok(Self::Integrity),
            other => Err(VocabularyError::unknown("LayerId", other)),
        }
    }

    /// Hierarchy depth: 1 (aspirational) through 6 (task prosecution).
    /// The integrity overlay sits outside the hierarchy at depth 0.
    #[must_use]
    pub const fn depth(&self) -> u8 {
        match self {
            Self::Integrity => 0,
            Self::Aspirational => 1,
            Self::Strategy => 2,
            Self::SelfModel => 3,
            Self::Executive => 4,
            Self::CognitiveControl => 5,
            Self::TaskProsecution => 6,
        }
    }

    /// Returns true for the six cognitive layers (excludes integrity).
    #[must_use]
    pub const fn is_cognitive(&self) -> bool {
        !matches!(self, Self::Integrity)
    }

    /// The six cognitive layers in hierarchy order.
    pub const COGNITIVE: [Self; 6] = [
        Self::Aspirational,
        Self::Strategy,
        Self::SelfModel,
        Self::Executive,
        Self::CognitiveControl,
        Self::TaskProsecution,
    ];
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical episode template identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateId {
    /// Grounding loop.
    A,
    /// Verification loop.
    B,
    /// Read-only act.
    C,
    /// Write act.
    D,
    /// Escalation.
    E,
    /// Degraded tools.
    F,
    /// Compile-to-code.
    G,
    /// Full-stack flow.
    H,
}

impl TemplateId {
    /// Returns the single-letter spelling of this template id.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
            Self::H => "H",
        }
    }

    /// Parses a template id (case-insensitive single letter).
    ///
    /// # Errors
    ///
    /// Returns `VocabularyError::UnknownValue` for any other string.
    pub fn parse(s: &str) -> Result<Self, VocabularyError> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            "F" => Ok(Self::F),
            "G" => Ok(Self::G),
            "H" => Ok(Self::H),
            _ => Err(VocabularyError::unknown("TemplateId", s)),
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
