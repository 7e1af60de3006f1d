//! The episode runner: drives a compiled episode step by step.
//!
//! One runner executes one episode at a time, sequentially: layer
//! invocation, per-candidate admission through the ledger, bus emission,
//! budget accounting, then successor selection. Many episodes may run
//! concurrently, each on its own runner with its own ledger; the only
//! shared state is the buses and the integrity overlay's registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::bus::{Bus, BusMessage};
use crate::layer::{contract, LayerInput, LayerPool};
use crate::ledger::{EpisodeLedger, LedgerError, LedgerEvent, LedgerSnapshot};
use crate::packet::{
    EscalationOption, EscalationPayload, Packet, PacketHeader, PacketPayload,
    TRIGGER_BUDGET_INSUFFICIENT,
};
use crate::template::CompiledEpisode;
use crate::validation::Diagnostic;
use crate::vocabulary::{FsmState, LayerId, PacketKind, TemplateId};

/// Cooperative cancellation flag shared between a caller and a running
/// episode.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard ceiling on executed steps.
    pub max_steps: usize,
    /// Whether the runner synthesizes Escalation packets on timeouts and
    /// budget exhaustion at elevated stakes.
    pub synthesize_escalations: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            synthesize_escalations: true,
        }
    }
}

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The executed step.
    pub step_id: String,
    /// Layer that owned the step.
    pub owner_layer: LayerId,
    /// Candidates the layer produced.
    pub emitted: usize,
    /// Packet ids admitted to the ledger.
    pub admitted: Vec<String>,
    /// Whether the step completed cleanly.
    pub success: bool,
    /// What failed, when it did.
    pub error: Option<String>,
    /// FSM state after the step.
    pub state_after: FsmState,
    /// Wall-clock duration of the step.
    pub duration: Duration,
}

/// Result of executing a complete episode.
#[derive(Debug, Clone)]
pub struct EpisodeResult {
    /// Episode identity.
    pub correlation_id: String,
    /// Template the episode was compiled from.
    pub template_id: TemplateId,
    /// Whether every executed step succeeded and an exit step was
    /// reached.
    pub success: bool,
    /// Per-step outcomes in execution order.
    pub steps: Vec<StepOutcome>,
    /// Final FSM state.
    pub final_state: FsmState,
    /// The step that failed, when one did.
    pub failed_step: Option<String>,
    /// Diagnostics that caused the failure.
    pub diagnostics: Vec<Diagnostic>,
    /// Final ledger snapshot.
    pub snapshot: LedgerSnapshot,
}

/// Executes compiled episodes against a layer pool and the buses.
pub struct EpisodeRunner {
    pool: LayerPool,
    northbound: Bus,
    southbound: Bus,
    config: RunnerConfig,
}

impl EpisodeRunner {
    /// A runner over the given pool with default buses and config.
    #[must_use]
    pub fn new(pool: LayerPool) -> Self {
        Self {
            pool,
            northbound: Bus::northbound(),
            southbound: Bus::southbound(),
            config: RunnerConfig::default(),
        }
    }

    /// Overrides the runner config.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Mutable access to the northbound bus, for subscription wiring.
    pub fn northbound_mut(&mut self) -> &mut Bus {
        &mut self.northbound
    }

    /// Mutable access to the southbound bus, for subscription wiring.
    pub fn southbound_mut(&mut self) -> &mut Bus {
        &mut self.southbound
    }

    /// Runs an episode to completion with a fresh cancel token.
    pub fn run(&mut self, episode: &CompiledEpisode, initial_packets: Vec<Packet>) -> EpisodeResult {
        self.run_cancellable(episode, initial_packets, &CancelToken::new())
    }

    /// Runs an episode to completion, observing `cancel` between steps
    /// and inside layer invocations that poll it.
    #[allow(clippy::too_many_lines)]
    pub fn run_cancellable(
        &mut self,
        episode: &CompiledEpisode,
        initial_packets: Vec<Packet>,
        cancel: &CancelToken,
    ) -> EpisodeResult {
        let entry_envelope = episode
            .step(&episode.entry_step)
            .map(|step| step.envelope.clone());
        let fallback_budgets = default_budgets();
        let budgets = entry_envelope
            .as_ref()
            .map_or(&fallback_budgets, |envelope| &envelope.budgets);
        let mut ledger = EpisodeLedger::create(
            episode.correlation_id.clone(),
            budgets,
            episode.initial_state(),
        );
        if let Some(campaign_id) = &episode.campaign_id {
            ledger = ledger.with_campaign(campaign_id.clone());
        }

        let mut steps: Vec<StepOutcome> = Vec::new();
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut failed_step: Option<String> = None;
        let mut success = false;

        let mut current_step_id = episode.entry_step.clone();
        let mut current_packets = initial_packets;

        loop {
            if steps.len() >= self.config.max_steps {
                failed_step = Some(current_step_id.clone());
                tracing::error!(
                    correlation_id = %episode.correlation_id,
                    max_steps = self.config.max_steps,
                    "step ceiling exceeded"
                );
                break;
            }
            if cancel.is_cancelled() {
                failed_step = Some(current_step_id.clone());
                tracing::warn!(
                    correlation_id = %episode.correlation_id,
                    "episode cancelled between steps"
                );
                break;
            }
            // Budget exhaustion is a cooperative cancellation: refuse the
            // next step and route the episode to escalation or safe mode.
            if ledger.budgets().is_over_budget() && !ledger.overrun_addressed() {
                self.route_budget_exhaustion(episode, &mut ledger);
                failed_step = Some(current_step_id.clone());
                break;
            }

            let Some(step) = episode.step(&current_step_id) else {
                failed_step = Some(current_step_id.clone());
                break;
            };

            let (outcome, admitted_packets, step_diagnostics) =
                self.execute_step(episode, step, &mut ledger, &current_packets, cancel);
            let step_failed = !outcome.success;
            steps.push(outcome);
            diagnostics.extend(step_diagnostics);

            if step_failed {
                failed_step = Some(current_step_id.clone());
                break;
            }
            if episode.is_exit(&current_step_id) {
                success = true;
                break;
            }

            match select_next_step(episode, step, &ledger) {
                Ok(Some(next)) => {
                    current_packets = admitted_packets;
                    current_step_id = next;
                },
                Ok(None) => {
                    success = true;
                    break;
                },
                Err(message) => {
                    tracing::error!(
                        correlation_id = %episode.correlation_id,
                        step_id = %current_step_id,
                        "{message}"
                    );
                    failed_step = Some(current_step_id.clone());
                    break;
                },
            }
        }

        ledger.close();
        let final_state = ledger.current_state();
        EpisodeResult {
            correlation_id: episode.correlation_id.clone(),
            template_id: episode.template_id,
            success,
            steps,
            final_state,
            failed_step,
            diagnostics,
            snapshot: ledger.snapshot(),
        }
    }

    fn execute_step(
        &mut self,
        episode: &CompiledEpisode,
        step: &crate::template::CompiledStep,
        ledger: &mut EpisodeLedger,
        input_packets: &[Packet],
        cancel: &CancelToken,
    ) -> (StepOutcome, Vec<Packet>, Vec<Diagnostic>) {
        let started = Instant::now();
        let mut outcome = StepOutcome {
            step_id: step.step_id.clone(),
            owner_layer: step.owner_layer,
            emitted: 0,
            admitted: Vec::new(),
            success: true,
            error: None,
            state_after: ledger.current_state(),
            duration: Duration::ZERO,
        };
        let mut admitted_packets = Vec::new();
        let mut diagnostics = Vec::new();

        // Marker steps emit nothing.
        if step.packet_kind.is_none() {
            outcome.duration = started.elapsed();
            return (outcome, admitted_packets, diagnostics);
        }

        let layer_contract = contract(step.owner_layer);
        let routed: Vec<Packet> = input_packets
            .iter()
            .filter(|packet| layer_contract.allows_receive(packet.kind()))
            .cloned()
            .collect();

        let candidates = match self.pool.invoke(
            step.owner_layer,
            LayerInput {
                packets: &routed,
                correlation_id: &episode.correlation_id,
                campaign_id: episode.campaign_id.as_deref(),
                step,
                now: Utc::now(),
                cancel,
            },
        ) {
            Ok(candidates) => candidates,
            Err(error) => {
                outcome.success = false;
                outcome.error = Some(error.to_string());
                outcome.duration = started.elapsed();
                return (outcome, admitted_packets, diagnostics);
            },
        };
        outcome.emitted = candidates.len();
        if candidates.is_empty() {
            // The step names a packet kind the layer was expected to
            // produce; silence is a failure, not a no-op.
            outcome.success = false;
            outcome.error = Some(format!(
                "layer {} produced no candidates for step {}",
                step.owner_layer, step.step_id
            ));
            outcome.duration = started.elapsed();
            return (outcome, admitted_packets, diagnostics);
        }

        for candidate in candidates {
            // Contract enforcement: an out-of-contract emission is dropped
            // and fails the step, but compliant candidates already
            // admitted stand.
            if !layer_contract.allows_emit(candidate.kind()) {
                outcome.success = false;
                outcome.error = Some(format!(
                    "layer {} emitted {} outside its contract",
                    step.owner_layer,
                    candidate.kind()
                ));
                tracing::error!(
                    correlation_id = %episode.correlation_id,
                    layer = %step.owner_layer,
                    kind = %candidate.kind(),
                    "layer contract violation; packet dropped"
                );
                break;
            }

            match ledger.apply(&candidate) {
                Ok(apply) => {
                    outcome.admitted.push(candidate.header.packet_id.clone());
                    self.publish(&candidate);
                    self.handle_events(episode, ledger, &apply.events);
                    admitted_packets.push(candidate);
                },
                Err(LedgerError::PacketRejected { report }) => {
                    outcome.success = false;
                    outcome.error = Some(format!(
                        "packet {} rejected by validation",
                        candidate.header.packet_id
                    ));
                    diagnostics.extend(report.diagnostics);
                    break;
                },
                Err(error) => {
                    outcome.success = false;
                    outcome.error = Some(error.to_string());
                    break;
                },
            }
        }

        // Per-step deadline from the step's own time budget.
        let budget = step.envelope.budgets.time_budget_seconds;
        if budget > 0 && started.elapsed() > Duration::from_secs(budget) {
            outcome.success = false;
            outcome.error = Some(format!("step exceeded its {budget}s time budget"));
            if ledger.stakes_level().is_elevated() && self.config.synthesize_escalations {
                self.synthesize_escalation(
                    episode,
                    ledger,
                    "step_timeout",
                    &format!("step {} exceeded its time budget", step.step_id),
                );
            }
        }

        outcome.state_after = ledger.current_state();
        outcome.duration = started.elapsed();
        tracing::debug!(
            correlation_id = %episode.correlation_id,
            step_id = %step.step_id,
            admitted = outcome.admitted.len(),
            state = %outcome.state_after,
            "step executed"
        );
        (outcome, admitted_packets, diagnostics)
    }

    fn publish(&mut self, packet: &Packet) {
        let message = BusMessage::broadcast(packet.clone(), Utc::now());
        let result = if packet.kind().is_northbound() {
            self.northbound.publish(message)
        } else {
            self.southbound.publish(message)
        };
        if let Err(error) = result {
            // Unreachable for well-formed kinds; surfaced for visibility.
            tracing::error!(packet_id = %packet.header.packet_id, "bus refused packet: {error}");
        }
    }

    fn handle_events(
        &mut self,
        episode: &CompiledEpisode,
        ledger: &mut EpisodeLedger,
        events: &[LedgerEvent],
    ) {
        for event in events {
            match event {
                LedgerEvent::DirectiveTimeout { task_id, .. } => {
                    if ledger.stakes_level().is_elevated() && self.config.synthesize_escalations {
                        self.synthesize_escalation(
                            episode,
                            ledger,
                            "task_timeout",
                            &format!("directive for {task_id} passed its deadline"),
                        );
                    }
                },
                LedgerEvent::BudgetThreshold { axis, ratio, severity } => {
                    tracing::warn!(
                        correlation_id = %episode.correlation_id,
                        axis = %axis,
                        ratio = %format!("{ratio:.2}"),
                        severity = ?severity,
                        "budget threshold crossed"
                    );
                },
                LedgerEvent::TokenRevoked { .. } | LedgerEvent::SafeModeChanged { .. } => {},
            }
        }
    }

    /// INV-005 routing: try a budget escalation; if the current state
    /// cannot admit one, halt to safe mode.
    fn route_budget_exhaustion(&mut self, episode: &CompiledEpisode, ledger: &mut EpisodeLedger) {
        tracing::warn!(
            correlation_id = %episode.correlation_id,
            "budget exhausted; refusing further steps"
        );
        if self.config.synthesize_escalations
            && self.synthesize_escalation(
                episode,
                ledger,
                TRIGGER_BUDGET_INSUFFICIENT,
                "episode budget exhausted before completion",
            )
        {
            return;
        }
        let control = ledger.control();
        control.set_safe_mode(
            crate::ledger::SafeMode::Halted,
            "budget exhausted and escalation not admissible",
        );
        let events = ledger.drain_control();
        self.handle_events(episode, ledger, &events);
    }

    /// Builds and admits an Escalation on the episode's behalf. Returns
    /// true when the packet was admitted.
    fn synthesize_escalation(
        &mut self,
        episode: &CompiledEpisode,
        ledger: &mut EpisodeLedger,
        trigger: &str,
        reason: &str,
    ) -> bool {
        let Some(envelope) = episode
            .step(&episode.entry_step)
            .map(|step| step.envelope.clone())
        else {
            return false;
        };
        let packet = Packet {
            header: PacketHeader::new(
                PacketKind::Escalation,
                LayerId::CognitiveControl,
                episode.correlation_id.clone(),
                Utc::now(),
            ),
            mcp: Some(envelope),
            payload: PacketPayload::Escalation(EscalationPayload {
                escalation_trigger: trigger.to_string(),
                top_options: vec![
                    EscalationOption {
                        option_id: "abort".to_string(),
                        description: "abort the episode and release resources".to_string(),
                        pros: vec!["no further spend".to_string()],
                        cons: vec!["work is abandoned".to_string()],
                    },
                    EscalationOption {
                        option_id: "extend".to_string(),
                        description: "extend budgets and resume".to_string(),
                        pros: vec!["work completes".to_string()],
                        cons: vec!["overrides the declared budget".to_string()],
                    },
                ],
                evidence_gaps: vec![reason.to_string()],
                recommended_next_step: "await operator direction".to_string(),
            }),
        };

        match ledger.apply(&packet) {
            Ok(apply) => {
                self.publish(&packet);
                self.handle_events(episode, ledger, &apply.events);
                tracing::warn!(
                    correlation_id = %episode.correlation_id,
                    trigger = %trigger,
                    "escalation synthesized"
                );
                true
            },
            Err(error) => {
                tracing::warn!(
                    correlation_id = %episode.correlation_id,
                    trigger = %trigger,
                    "synthesized escalation not admissible: {error}"
                );
                false
            },
        }
    }
}

impl std::fmt::Debug for EpisodeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeRunner")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

/// Successor selection: the single successor when unambiguous, otherwise
/// the successor whose guard matches the last decision's outcome, with an
/// unguarded successor as fallback.
fn select_next_step(
    episode: &CompiledEpisode,
    step: &crate::template::CompiledStep,
    ledger: &EpisodeLedger,
) -> Result<Option<String>, String> {
    match step.next_steps.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.clone())),
        many => {
            let outcome = ledger.last_decision_outcome();
            for next_id in many {
                let guard = episode.step(next_id).and_then(|next| next.guard_outcome);
                if guard.is_some() && guard == outcome {
                    return Ok(Some(next_id.clone()));
                }
            }
            for next_id in many {
                if episode
                    .step(next_id)
                    .is_some_and(|next| next.guard_outcome.is_none())
                {
                    return Ok(Some(next_id.clone()));
                }
            }
            Err(format!(
                "ambiguous successors for step {}: outcome {outcome:?} matched no guard",
                step.step_id
            ))
        },
    }
}

fn default_budgets() -> crate::packet::Budgets {
    crate::packet::Budgets {
        token_budget: 0,
        tool_call_budget: 0,
        time_budget_seconds: 0,
        risk_budget: crate::packet::RiskBudget {
            envelope: "none".to_string(),
            max_loss: serde_json::json!(null),
        },
    }
}
