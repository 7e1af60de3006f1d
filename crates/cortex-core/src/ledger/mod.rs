//! The episode ledger: cumulative per-episode state threaded through the
//! three validation gates.
//!
//! One ledger exists per `correlation_id`. It is created when the episode
//! starts, mutated in place by every admitted packet, and frozen when the
//! episode reaches a terminal state. `apply` is the single admission
//! point: schema, then FSM, then invariants, and only if all three pass
//! does any state change.
//!
//! Validation is deterministic in the packet's `created_at` timestamp, not
//! wall clock, so replaying an admitted stream into a fresh ledger
//! reproduces an identical snapshot.

mod control;
mod snapshot;
mod state;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::packet::{
    Budgets, Packet, PacketPayload, ALERT_TYPE_BUDGET_OVERRIDE, TRIGGER_BUDGET_INSUFFICIENT,
};
use crate::validation::fsm::{self, EpisodeSignal, FsmTransition};
use crate::validation::invariants::{self, FreshnessConfig};
use crate::validation::result::{Diagnostic, ValidationReport};
use crate::validation::schema;
use crate::vocabulary::{
    AlertSeverity, DecisionOutcome, EpistemicStatus, FsmState, PacketKind, StakesLevel,
    TaskResultStatus, ToolSafetyClass,
};

pub use control::{ControlRequest, LedgerControl};
pub use snapshot::LedgerSnapshot;
pub use state::{
    ActiveToken, AssumptionEntry, BudgetAxis, BudgetState, ContradictionEntry, EvidenceEntry,
    LedgerEvent, OpenDirective, SafeMode, VerifyWindow,
};

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// One or more validation gates rejected the packet. The ledger is
    /// unchanged.
    #[error("packet rejected with {} error(s)", .report.errors().count())]
    PacketRejected {
        /// Every diagnostic collected for the packet.
        report: ValidationReport,
    },

    /// The packet belongs to a different episode.
    #[error("correlation mismatch: ledger is {expected}, packet is {actual}")]
    CorrelationMismatch {
        /// The ledger's correlation id.
        expected: String,
        /// The packet's correlation id.
        actual: String,
    },

    /// The episode has been frozen; no further packets are admitted.
    #[error("episode {correlation_id} is closed")]
    EpisodeClosed {
        /// The frozen episode.
        correlation_id: String,
    },

    /// A non-packet signal arrived in a state that does not accept it.
    #[error("signal {signal:?} not accepted in state {state}")]
    SignalNotAllowed {
        /// The rejected signal.
        signal: EpisodeSignal,
        /// The state it arrived in.
        state: FsmState,
    },
}

/// Result of a successful `apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// FSM state after admission.
    pub new_state: FsmState,
    /// Warning-severity findings (the packet was still admitted).
    pub warnings: Vec<Diagnostic>,
    /// Events produced by the mutation (budget thresholds, timeouts,
    /// control-queue effects).
    pub events: Vec<LedgerEvent>,
}

/// Cumulative episode state for one `correlation_id`.
#[derive(Debug)]
pub struct EpisodeLedger {
    correlation_id: String,
    campaign_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    current_state: FsmState,
    initial_state: FsmState,
    safe_mode: SafeMode,
    stakes_level: StakesLevel,
    budgets: BudgetState,
    active_tokens: BTreeMap<String, ActiveToken>,
    open_directives: BTreeMap<String, OpenDirective>,
    evidence_index: Vec<EvidenceEntry>,
    assumptions: Vec<AssumptionEntry>,
    contradictions: Vec<ContradictionEntry>,
    recent_packets: Vec<Packet>,
    packet_ids: Vec<String>,
    packet_id_set: HashSet<String>,
    model_established: bool,
    last_decision_outcome: Option<DecisionOutcome>,
    verify_window: Option<VerifyWindow>,
    overrun_addressed: bool,
    frozen: bool,
    control: LedgerControl,
    freshness: FreshnessConfig,
}

impl EpisodeLedger {
    /// Creates a ledger for an episode with the given initial budgets and
    /// starting state.
    ///
    /// Templates that enter mid-flow (e.g. a write-act episode entering at
    /// `S3_DECIDE`) seed `initial_state` accordingly; an initial state at
    /// or past `S2_MODEL` counts as an established world model.
    #[must_use]
    pub fn create(
        correlation_id: impl Into<String>,
        initial_budgets: &Budgets,
        initial_state: FsmState,
    ) -> Self {
        let risk_limit = initial_budgets.risk_budget.max_loss.as_f64();
        Self {
            correlation_id: correlation_id.into(),
            campaign_id: None,
            started_at: None,
            current_state: initial_state,
            initial_state,
            safe_mode: SafeMode::Normal,
            stakes_level: StakesLevel::Low,
            budgets: BudgetState::new(
                initial_budgets.token_budget,
                initial_budgets.tool_call_budget,
                initial_budgets.time_budget_seconds,
                risk_limit,
            ),
            active_tokens: BTreeMap::new(),
            open_directives: BTreeMap::new(),
            evidence_index: Vec::new(),
            assumptions: Vec::new(),
            contradictions: Vec::new(),
            recent_packets: Vec::new(),
            packet_ids: Vec::new(),
            packet_id_set: HashSet::new(),
            model_established: initial_state.model_established(),
            last_decision_outcome: None,
            verify_window: None,
            overrun_addressed: false,
            frozen: false,
            control: LedgerControl::new(),
            freshness: FreshnessConfig::default(),
        }
    }

    /// Sets the campaign id.
    #[must_use]
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Overrides the freshness windows used by the evidence-grounding
    /// invariant.
    #[must_use]
    pub fn with_freshness(mut self, freshness: FreshnessConfig) -> Self {
        self.freshness = freshness;
        self
    }

    /// Returns a handle for enqueueing external control requests.
    #[must_use]
    pub fn control(&self) -> LedgerControl {
        self.control.clone()
    }

    /// The episode's correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Current FSM state.
    #[must_use]
    pub const fn current_state(&self) -> FsmState {
        self.current_state
    }

    /// Current safe mode.
    #[must_use]
    pub const fn safe_mode(&self) -> SafeMode {
        self.safe_mode
    }

    /// Highest stakes level seen on any admitted envelope.
    #[must_use]
    pub const fn stakes_level(&self) -> StakesLevel {
        self.stakes_level
    }

    /// Whether a belief update (or the initial state) has established a
    /// world model.
    #[must_use]
    pub const fn model_established(&self) -> bool {
        self.model_established
    }

    /// Outcome of the most recently admitted decision.
    #[must_use]
    pub const fn last_decision_outcome(&self) -> Option<DecisionOutcome> {
        self.last_decision_outcome
    }

    /// The in-flight verification window, when one is open.
    #[must_use]
    pub const fn verify_window(&self) -> Option<&VerifyWindow> {
        self.verify_window.as_ref()
    }

    /// Looks up a live token.
    #[must_use]
    pub fn token(&self, token_id: &str) -> Option<&ActiveToken> {
        self.active_tokens.get(token_id)
    }

    /// The live token table.
    #[must_use]
    pub const fn active_tokens(&self) -> &BTreeMap<String, ActiveToken> {
        &self.active_tokens
    }

    /// Looks up an open directive by task id.
    #[must_use]
    pub fn open_directive(&self, task_id: &str) -> Option<&OpenDirective> {
        self.open_directives.get(task_id)
    }

    /// The open directive table.
    #[must_use]
    pub const fn open_directives(&self) -> &BTreeMap<String, OpenDirective> {
        &self.open_directives
    }

    /// Returns true when any directive awaits its result.
    #[must_use]
    pub fn has_open_directives(&self) -> bool {
        !self.open_directives.is_empty()
    }

    /// Budget allocation and usage.
    #[must_use]
    pub const fn budgets(&self) -> &BudgetState {
        &self.budgets
    }

    /// Whether a budget overrun has been approved by escalation or
    /// integrity override.
    #[must_use]
    pub const fn overrun_addressed(&self) -> bool {
        self.overrun_addressed
    }

    /// Number of unresolved contradictions.
    #[must_use]
    pub fn unresolved_contradictions(&self) -> usize {
        self.contradictions.iter().filter(|c| !c.resolved).count()
    }

    /// The ordered evidence log.
    #[must_use]
    pub fn evidence_index(&self) -> &[EvidenceEntry] {
        &self.evidence_index
    }

    /// The ordered packet log.
    #[must_use]
    pub fn recent_packets(&self) -> &[Packet] {
        &self.recent_packets
    }

    /// Returns true when a packet with this id has been admitted.
    #[must_use]
    pub fn contains_packet(&self, packet_id: &str) -> bool {
        self.packet_id_set.contains(packet_id)
    }

    /// The freshness windows in force for this episode.
    #[must_use]
    pub const fn freshness(&self) -> &FreshnessConfig {
        &self.freshness
    }

    /// Whether the episode has been frozen.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Validates and admits one packet.
    ///
    /// Runs schema, FSM, and invariant validation in order, collecting all
    /// diagnostics; the ledger mutates only if every error-severity check
    /// passes.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::PacketRejected` with the full report on any
    /// validation error, `CorrelationMismatch` for foreign packets, and
    /// `EpisodeClosed` once frozen.
    pub fn apply(&mut self, packet: &Packet) -> Result<ApplyOutcome, LedgerError> {
        if self.frozen {
            return Err(LedgerError::EpisodeClosed {
                correlation_id: self.correlation_id.clone(),
            });
        }

        let mut events = self.drain_control();

        if packet.header.correlation_id != self.correlation_id {
            return Err(LedgerError::CorrelationMismatch {
                expected: self.correlation_id.clone(),
                actual: packet.header.correlation_id.clone(),
            });
        }

        let mut report = ValidationReport::new();
        self.check_episode_identity(packet, &mut report);
        report.merge(schema::validate_structure(packet));
        if !report.is_valid() {
            return Err(LedgerError::PacketRejected { report });
        }

        let transition = match fsm::evaluate(self, packet) {
            Ok(transition) => transition,
            Err(diagnostics) => {
                report.diagnostics.extend(diagnostics);
                return Err(LedgerError::PacketRejected { report });
            },
        };
        report.diagnostics.extend(transition.warnings.clone());

        report
            .diagnostics
            .extend(invariants::evaluate(self, packet));
        if !report.is_valid() {
            return Err(LedgerError::PacketRejected { report });
        }

        self.admit(packet, &transition, &mut events);

        let warnings: Vec<Diagnostic> = report.diagnostics;
        for warning in &warnings {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                packet_id = %packet.header.packet_id,
                code = %warning.code,
                "{}",
                warning.message
            );
        }
        tracing::debug!(
            correlation_id = %self.correlation_id,
            packet_id = %packet.header.packet_id,
            kind = %packet.kind(),
            state = %self.current_state,
            "packet admitted"
        );

        Ok(ApplyOutcome {
            new_state: self.current_state,
            warnings,
            events,
        })
    }

    /// Delivers a non-packet signal to the state machine.
    ///
    /// `UserInput` re-enters `S3_DECIDE` from `S8_ESCALATED`;
    /// `EpisodeClose` returns `S7_REVIEW` to `S0_IDLE` and freezes the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::SignalNotAllowed` when the current state does
    /// not accept the signal, and `EpisodeClosed` once frozen.
    pub fn apply_signal(&mut self, signal: EpisodeSignal) -> Result<FsmState, LedgerError> {
        if self.frozen {
            return Err(LedgerError::EpisodeClosed {
                correlation_id: self.correlation_id.clone(),
            });
        }
        match (signal, self.current_state) {
            (EpisodeSignal::UserInput, FsmState::S8Escalated) => {
                self.current_state = FsmState::S3Decide;
                Ok(self.current_state)
            },
            (EpisodeSignal::EpisodeClose, FsmState::S7Review | FsmState::S0Idle) => {
                self.current_state = FsmState::S0Idle;
                self.frozen = true;
                Ok(self.current_state)
            },
            (signal, state) => Err(LedgerError::SignalNotAllowed { signal, state }),
        }
    }

    /// Records resource consumption reported by the runner and returns any
    /// budget threshold events crossed.
    pub fn consume(&mut self, tokens: u64, tool_calls: u64, time_seconds: u64) -> Vec<LedgerEvent> {
        self.budgets.consume(tokens, tool_calls, time_seconds);
        self.budget_events()
    }

    /// Emits timeout events for open directives whose deadline has passed
    /// at `now`.
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        for directive in self.open_directives.values_mut() {
            if directive.timed_out {
                continue;
            }
            if let Some(deadline) = directive.deadline() {
                if now > deadline {
                    directive.timed_out = true;
                    events.push(LedgerEvent::DirectiveTimeout {
                        task_id: directive.task_id.clone(),
                        directive_packet_id: directive.directive_packet_id.clone(),
                        deadline,
                    });
                }
            }
        }
        for event in &events {
            if let LedgerEvent::DirectiveTimeout { task_id, .. } = event {
                tracing::warn!(
                    correlation_id = %self.correlation_id,
                    task_id = %task_id,
                    "directive timed out without a result"
                );
            }
        }
        events
    }

    /// Processes pending control requests (revocations, safe-mode
    /// transitions) and returns the resulting events.
    pub fn drain_control(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        for request in self.control.drain() {
            match request {
                ControlRequest::RevokeToken { token_id, reason } => {
                    if let Some(token) = self.active_tokens.get_mut(&token_id) {
                        token.revoke(reason.clone());
                        events.push(LedgerEvent::TokenRevoked { token_id, reason });
                    }
                },
                ControlRequest::RevokeAllTokens { reason } => {
                    for token in self.active_tokens.values_mut() {
                        if !token.revoked {
                            token.revoke(reason.clone());
                            events.push(LedgerEvent::TokenRevoked {
                                token_id: token.token_id.clone(),
                                reason: reason.clone(),
                            });
                        }
                    }
                },
                ControlRequest::SetSafeMode { mode, reason } => {
                    self.safe_mode = mode;
                    if mode == SafeMode::Halted {
                        self.current_state = FsmState::S9Safemode;
                    }
                    events.push(LedgerEvent::SafeModeChanged { mode, reason });
                },
            }
        }
        events
    }

    /// Freezes the ledger; no further packets will be admitted.
    pub fn close(&mut self) {
        self.frozen = true;
    }

    /// Produces an immutable snapshot for persistence and external
    /// readers.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            correlation_id: self.correlation_id.clone(),
            campaign_id: self.campaign_id.clone(),
            started_at: self.started_at,
            current_state: self.current_state,
            initial_state: self.initial_state,
            safe_mode: self.safe_mode,
            stakes_level: self.stakes_level,
            budgets: self.budgets.clone(),
            active_tokens: self.active_tokens.clone(),
            open_directives: self.open_directives.clone(),
            evidence_index: self.evidence_index.clone(),
            assumptions: self.assumptions.clone(),
            contradictions: self.contradictions.clone(),
            packet_ids: self.packet_ids.clone(),
            model_established: self.model_established,
            last_decision_outcome: self.last_decision_outcome,
            overrun_addressed: self.overrun_addressed,
            frozen: self.frozen,
        }
    }

    fn check_episode_identity(&self, packet: &Packet, report: &mut ValidationReport) {
        if self.packet_id_set.contains(&packet.header.packet_id) {
            report.push(Diagnostic::schema_error(
                "header.packet_id",
                format!("duplicate packet id: {}", packet.header.packet_id),
            ));
        }
        if let Some(previous) = &packet.header.previous_packet_id {
            if !self.packet_id_set.contains(previous) {
                report.push(Diagnostic::schema_error(
                    "header.previous_packet_id",
                    format!("previous packet {previous} not found in this episode"),
                ));
            }
        }
        if let Some(token) = packet.token() {
            if self.active_tokens.contains_key(&token.token_id) {
                report.push(Diagnostic::schema_error(
                    "payload.token_id",
                    format!("duplicate token id: {}", token.token_id),
                ));
            }
        }
    }

    /// Applies the already-validated packet's effects. Infallible by
    /// construction: every rejection path has been taken before this
    /// point.
    fn admit(&mut self, packet: &Packet, transition: &FsmTransition, events: &mut Vec<LedgerEvent>) {
        let created_at = packet.header.created_at;
        self.started_at.get_or_insert(created_at);

        if let Some(envelope) = packet.envelope() {
            self.stakes_level = self.stakes_level.max(envelope.stakes.stakes_level);
        }

        self.packet_ids.push(packet.header.packet_id.clone());
        self.packet_id_set.insert(packet.header.packet_id.clone());

        let in_verify_window =
            transition.from == FsmState::S4Verify && self.verify_window.is_some();

        match &packet.payload {
            PacketPayload::Observation(_) => {
                if in_verify_window {
                    let observed = packet
                        .envelope()
                        .is_some_and(|e| e.epistemics.status == EpistemicStatus::Observed);
                    if observed {
                        if let Some(window) = &mut self.verify_window {
                            window.observed_observation_seen = true;
                        }
                    }
                }
            },
            PacketPayload::BeliefUpdate(payload) => {
                self.model_established = true;
                if payload.update_type == crate::packet::UPDATE_TYPE_CONTRADICTION_RESOLVED {
                    for contradiction in &mut self.contradictions {
                        contradiction.resolved = true;
                    }
                } else if payload.update_type.contains("contradiction") {
                    let description = payload.belief_changes.first().map_or_else(
                        || payload.update_type.clone(),
                        |change| format!("{}.{} conflict", change.domain, change.key),
                    );
                    self.contradictions.push(ContradictionEntry {
                        description,
                        raised_by_packet_id: packet.header.packet_id.clone(),
                        resolved: false,
                    });
                }
                if transition.from == FsmState::S4Verify && transition.to == FsmState::S2Model {
                    self.verify_window = None;
                }
            },
            PacketPayload::Decision(payload) => {
                self.last_decision_outcome = Some(payload.decision_outcome);
                if payload.decision_outcome == DecisionOutcome::VerifyFirst {
                    let tools_state = packet
                        .envelope()
                        .map_or(crate::vocabulary::ToolsState::ToolsOk, |e| {
                            e.routing.tools_state
                        });
                    self.verify_window = Some(VerifyWindow::open(
                        packet.header.packet_id.clone(),
                        tools_state,
                    ));
                }
                for assumption in &payload.load_bearing_assumptions {
                    self.assumptions.push(AssumptionEntry {
                        text: assumption.assumption.clone(),
                        load_bearing: true,
                        verified: assumption.verified,
                        verification_packet_id: assumption.verification_packet_id.clone(),
                        source_packet_id: packet.header.packet_id.clone(),
                    });
                }
                if let Some(envelope) = packet.envelope() {
                    for text in &envelope.epistemics.assumptions {
                        self.assumptions.push(AssumptionEntry {
                            text: text.clone(),
                            load_bearing: false,
                            verified: false,
                            verification_packet_id: None,
                            source_packet_id: packet.header.packet_id.clone(),
                        });
                    }
                }
            },
            PacketPayload::VerificationPlan(_) => {
                if in_verify_window {
                    if let Some(window) = &mut self.verify_window {
                        window.plan_seen = true;
                    }
                }
            },
            PacketPayload::ToolAuthorizationToken(payload) => {
                self.active_tokens.insert(
                    payload.token_id.clone(),
                    ActiveToken::from_payload(payload),
                );
            },
            PacketPayload::TaskDirective(payload) => {
                self.open_directives.insert(
                    payload.task_id.clone(),
                    OpenDirective {
                        task_id: payload.task_id.clone(),
                        directive_packet_id: packet.header.packet_id.clone(),
                        created_at,
                        timeout_seconds: payload.timeout_seconds,
                        safety: payload.safety_class(),
                        timed_out: false,
                    },
                );
                if payload.safety_class().requires_authorization() {
                    // Atomic with the INV-007 check: validation saw
                    // usage_count < max, so this increment cannot overflow
                    // the ceiling.
                    if let Some(token_id) = &payload.authorization_token_id {
                        if let Some(token) = self.active_tokens.get_mut(token_id) {
                            token.usage_count += 1;
                        }
                    }
                }
                if in_verify_window && payload.safety_class() == ToolSafetyClass::Read {
                    if let Some(window) = &mut self.verify_window {
                        window.read_directive_seen = true;
                    }
                }
            },
            PacketPayload::TaskResult(payload) => {
                self.open_directives.remove(&payload.task_id);
                if in_verify_window && payload.result_status == TaskResultStatus::Success {
                    if let Some(window) = &mut self.verify_window {
                        window.success_result_seen = true;
                    }
                }
                let tool_calls = payload
                    .execution
                    .and_then(|meta| meta.tool_calls)
                    .map_or(1, u64::from);
                let time_seconds = payload
                    .execution
                    .and_then(|meta| meta.duration_ms)
                    .map_or(0, |ms| ms.div_ceil(1000));
                self.budgets.consume(0, tool_calls, time_seconds);
            },
            PacketPayload::Escalation(payload) => {
                if payload.escalation_trigger == TRIGGER_BUDGET_INSUFFICIENT
                    && self.budgets.is_over_budget()
                {
                    self.overrun_addressed = true;
                }
            },
            PacketPayload::IntegrityAlert(payload) => {
                if payload.severity == AlertSeverity::Critical {
                    self.safe_mode = SafeMode::Halted;
                } else if self.current_state == FsmState::S9Safemode
                    && payload.severity == AlertSeverity::Info
                {
                    self.safe_mode = SafeMode::Normal;
                }
                if payload.alert_type == ALERT_TYPE_BUDGET_OVERRIDE {
                    self.overrun_addressed = true;
                }
            },
        }

        // Evidence index: telemetry-bearing kinds contribute their refs.
        if matches!(
            packet.kind(),
            PacketKind::Observation | PacketKind::TaskResult | PacketKind::BeliefUpdate
        ) {
            if let Some(envelope) = packet.envelope() {
                for evidence_ref in &envelope.evidence.evidence_refs {
                    if in_verify_window {
                        if let Some(window) = &mut self.verify_window {
                            window.evidence_ids.insert(evidence_ref.ref_id.clone());
                        }
                    }
                    self.evidence_index.push(EvidenceEntry {
                        evidence: evidence_ref.clone(),
                        source_packet_id: packet.header.packet_id.clone(),
                        recorded_at: created_at,
                    });
                }
            }
        }

        self.recent_packets.push(packet.clone());
        self.current_state = transition.to;

        events.extend(self.budget_events());
        events.extend(self.check_timeouts(created_at));
    }

    fn budget_events(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        let exceeded_severity = if self.stakes_level == StakesLevel::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        };
        for axis in [
            BudgetAxis::Tokens,
            BudgetAxis::ToolCalls,
            BudgetAxis::TimeSeconds,
            BudgetAxis::Risk,
        ] {
            let Some(ratio) = self.budgets.ratio(axis) else {
                continue;
            };
            if ratio >= 1.0 && !self.budgets.exceeded_axes.contains(&axis) {
                self.budgets.exceeded_axes.insert(axis);
                events.push(LedgerEvent::BudgetThreshold {
                    axis,
                    ratio,
                    severity: exceeded_severity,
                });
            } else if ratio >= 0.8 && !self.budgets.warned_axes.contains(&axis) {
                self.budgets.warned_axes.insert(axis);
                events.push(LedgerEvent::BudgetThreshold {
                    axis,
                    ratio,
                    severity: AlertSeverity::Warning,
                });
            }
        }
        events
    }
}
