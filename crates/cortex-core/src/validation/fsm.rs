//! Per-episode state machine over legal packet sequences.
//!
//! Second validation gate. Transitions are keyed on the current state and
//! the packet kind, with payload discriminants where the protocol calls
//! for them (decision outcomes, directive safety classes, alert
//! severities). Two edges the original transition surfaces disagree on
//! (`S2_MODEL` re-entering `S1_SENSE` on an Observation, and `S7_REVIEW`
//! accepting a Decision) are admitted but flagged as warnings until the
//! divergence is resolved.

use serde::{Deserialize, Serialize};

use crate::ledger::EpisodeLedger;
use crate::packet::{Packet, TaskDirectivePayload};
use crate::vocabulary::{
    AlertSeverity, DecisionOutcome, FsmState, PacketKind, ToolSafetyClass,
};

use super::result::Diagnostic;

/// A distinguished non-packet event delivered to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeSignal {
    /// A human responded to an escalation; re-enters `S3_DECIDE`.
    UserInput,
    /// The episode is complete; returns `S7_REVIEW` to `S0_IDLE`.
    EpisodeClose,
}

/// A validated state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmTransition {
    /// State before the packet.
    pub from: FsmState,
    /// State after the packet.
    pub to: FsmState,
    /// Warning-severity findings attached to the transition.
    pub warnings: Vec<Diagnostic>,
}

impl FsmTransition {
    fn new(from: FsmState, to: FsmState) -> Self {
        Self {
            from,
            to,
            warnings: Vec::new(),
        }
    }

    fn with_warning(mut self, warning: Diagnostic) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// Validates that `packet` is a legal next step for the episode and
/// computes the resulting state.
///
/// # Errors
///
/// Returns the diagnostics describing why the transition is illegal.
pub fn evaluate(
    ledger: &EpisodeLedger,
    packet: &Packet,
) -> Result<FsmTransition, Vec<Diagnostic>> {
    let from = ledger.current_state();
    let kind = packet.kind();

    // Integrity alerts bypass the per-state table: CRITICAL forces safe
    // mode from anywhere, INFO clears it back to review.
    if let Some(alert) = packet.integrity_alert() {
        let to = match (from, alert.severity) {
            (_, AlertSeverity::Critical) => FsmState::S9Safemode,
            (FsmState::S9Safemode, AlertSeverity::Info) => FsmState::S7Review,
            (state, _) => state,
        };
        return Ok(FsmTransition::new(from, to));
    }

    // Safe-mode containment: only alerts (handled above) and belief
    // updates (logging) are admitted.
    if from == FsmState::S9Safemode {
        if kind == PacketKind::BeliefUpdate {
            return Ok(FsmTransition::new(from, from));
        }
        return Err(vec![Diagnostic::fsm_error(format!(
            "safe mode admits only IntegrityAlert and BeliefUpdate packets, got {kind}"
        ))]);
    }

    let transition = match (from, kind) {
        (FsmState::S0Idle, PacketKind::Observation) => {
            FsmTransition::new(from, FsmState::S1Sense)
        },

        (FsmState::S1Sense, PacketKind::Observation) => FsmTransition::new(from, from),
        (FsmState::S1Sense, PacketKind::BeliefUpdate) => {
            FsmTransition::new(from, FsmState::S2Model)
        },

        (FsmState::S2Model, PacketKind::BeliefUpdate) => FsmTransition::new(from, from),
        (FsmState::S2Model, PacketKind::Decision) => {
            FsmTransition::new(from, decision_target(ledger, packet)?)
        },
        // Divergent edge: one transition surface lets the model loop back
        // to sensing when it needs more data.
        (FsmState::S2Model, PacketKind::Observation) => {
            FsmTransition::new(from, FsmState::S1Sense).with_warning(Diagnostic::fsm_warning(
                "S2_MODEL -> S1_SENSE on Observation is a divergent edge between transition surfaces",
            ))
        },

        (FsmState::S3Decide, PacketKind::Decision) => {
            FsmTransition::new(from, decision_target(ledger, packet)?)
        },
        (FsmState::S3Decide, PacketKind::ToolAuthorizationToken) => {
            require_act(ledger, "a token")?;
            FsmTransition::new(from, FsmState::S5Authorize)
        },
        (FsmState::S3Decide, PacketKind::TaskDirective) => {
            require_act(ledger, "a directive")?;
            let directive = expect_directive(packet)?;
            if directive.safety_class().requires_authorization() {
                return Err(vec![Diagnostic::fsm_error(
                    "WRITE/MIXED directives require S5_AUTHORIZE; issue a token first",
                )]);
            }
            FsmTransition::new(from, FsmState::S6Execute)
        },
        // Escalations are admitted from any mid-flight state: decisions
        // hand off deliberately, and budget or timeout escalations can
        // land during verification, authorization, execution, or review.
        (
            FsmState::S3Decide
            | FsmState::S4Verify
            | FsmState::S5Authorize
            | FsmState::S6Execute
            | FsmState::S7Review,
            PacketKind::Escalation,
        ) => FsmTransition::new(from, FsmState::S8Escalated),

        (FsmState::S4Verify, PacketKind::VerificationPlan) => FsmTransition::new(from, from),
        (FsmState::S4Verify, PacketKind::TaskDirective) => {
            let directive = expect_directive(packet)?;
            if ledger.last_decision_outcome() != Some(DecisionOutcome::VerifyFirst) {
                return Err(vec![Diagnostic::fsm_error(
                    "verification directives require a preceding VERIFY_FIRST decision",
                )]);
            }
            if directive.safety_class() != ToolSafetyClass::Read {
                return Err(vec![Diagnostic::fsm_error(
                    "the verification loop admits READ directives only",
                )]);
            }
            FsmTransition::new(from, from)
        },
        (FsmState::S4Verify, PacketKind::TaskResult | PacketKind::Observation) => {
            FsmTransition::new(from, from)
        },
        (FsmState::S4Verify, PacketKind::BeliefUpdate) => {
            // Closure requirements are INV-008's job.
            FsmTransition::new(from, FsmState::S2Model)
        },

        (FsmState::S5Authorize, PacketKind::ToolAuthorizationToken) => {
            FsmTransition::new(from, from)
        },
        (FsmState::S5Authorize, PacketKind::TaskDirective) => {
            require_act(ledger, "a directive")?;
            FsmTransition::new(from, FsmState::S6Execute)
        },

        (FsmState::S6Execute, PacketKind::TaskDirective) => {
            require_act(ledger, "a directive")?;
            FsmTransition::new(from, from)
        },
        (FsmState::S6Execute, PacketKind::TaskResult | PacketKind::Observation) => {
            FsmTransition::new(from, from)
        },
        (FsmState::S6Execute, PacketKind::BeliefUpdate) => {
            // All directives closed means execution is complete and the
            // episode moves to review; otherwise back to modelling.
            let to = if ledger.has_open_directives() {
                FsmState::S2Model
            } else {
                FsmState::S7Review
            };
            FsmTransition::new(from, to)
        },

        (FsmState::S7Review, PacketKind::BeliefUpdate) => FsmTransition::new(from, from),
        // Divergent edge: the validator surface allows re-deciding from
        // review.
        (FsmState::S7Review, PacketKind::Decision) => {
            FsmTransition::new(from, decision_target(ledger, packet)?).with_warning(
                Diagnostic::fsm_warning(
                    "S7_REVIEW -> S3_DECIDE on Decision is a divergent edge between transition surfaces",
                ),
            )
        },

        (FsmState::S8Escalated, PacketKind::Escalation) => FsmTransition::new(from, from),

        (from, kind) => {
            return Err(vec![Diagnostic::fsm_error(format!(
                "illegal transition: {kind} not admitted in {from}"
            ))]);
        },
    };

    Ok(transition)
}

/// Possible next states for a `(state, packet kind)` pair, divergent edges
/// included. Every transition `evaluate` produces lands in this set; the
/// FSM soundness property test checks exactly that.
#[must_use]
pub fn transition_targets(from: FsmState, kind: PacketKind) -> Vec<FsmState> {
    use FsmState::{
        S0Idle, S1Sense, S2Model, S3Decide, S4Verify, S5Authorize, S6Execute, S7Review,
        S8Escalated, S9Safemode,
    };

    if kind == PacketKind::IntegrityAlert {
        // CRITICAL -> S9 from anywhere; INFO clears S9 to S7; otherwise no
        // state change.
        let mut targets = vec![S9Safemode, from];
        if from == S9Safemode {
            targets.push(S7Review);
        }
        return targets;
    }
    if from == S9Safemode {
        return if kind == PacketKind::BeliefUpdate {
            vec![S9Safemode]
        } else {
            vec![]
        };
    }

    let decision_targets = vec![S3Decide, S4Verify, S7Review, S8Escalated];
    match (from, kind) {
        (S0Idle, PacketKind::Observation) => vec![S1Sense],
        (S1Sense, PacketKind::Observation) => vec![S1Sense],
        (S1Sense, PacketKind::BeliefUpdate) => vec![S2Model],
        (S2Model, PacketKind::BeliefUpdate) => vec![S2Model],
        (S2Model, PacketKind::Observation) => vec![S1Sense],
        (S2Model | S3Decide | S7Review, PacketKind::Decision) => decision_targets,
        (S3Decide, PacketKind::ToolAuthorizationToken) => vec![S5Authorize],
        (S3Decide | S5Authorize, PacketKind::TaskDirective) => vec![S6Execute],
        (
            S3Decide | S4Verify | S5Authorize | S6Execute | S7Review,
            PacketKind::Escalation,
        ) => vec![S8Escalated],
        (S4Verify, PacketKind::VerificationPlan | PacketKind::TaskDirective) => vec![S4Verify],
        (S4Verify, PacketKind::TaskResult | PacketKind::Observation) => vec![S4Verify],
        (S4Verify, PacketKind::BeliefUpdate) => vec![S2Model],
        (S5Authorize, PacketKind::ToolAuthorizationToken) => vec![S5Authorize],
        (S6Execute, PacketKind::TaskDirective | PacketKind::TaskResult | PacketKind::Observation) => {
            vec![S6Execute]
        },
        (S6Execute, PacketKind::BeliefUpdate) => vec![S7Review, S2Model],
        (S7Review, PacketKind::BeliefUpdate) => vec![S7Review],
        (S8Escalated, PacketKind::Escalation) => vec![S8Escalated],
        _ => vec![],
    }
}

/// Outcome-directed target for a Decision packet.
///
/// Decisions transition through `S3_DECIDE` in two phases: admission, then
/// the outcome branch. ACT remains in `S3_DECIDE`; the subsequent token or
/// directive selects `S5_AUTHORIZE` or `S6_EXECUTE`.
fn decision_target(ledger: &EpisodeLedger, packet: &Packet) -> Result<FsmState, Vec<Diagnostic>> {
    if !ledger.model_established() {
        return Err(vec![Diagnostic::fsm_error(
            "no decision without a model: at least one BeliefUpdate must precede a Decision",
        )]);
    }
    let Some(decision) = packet.decision() else {
        return Err(vec![Diagnostic::fsm_error(
            "Decision packet without a decision payload",
        )]);
    };
    Ok(match decision.decision_outcome {
        DecisionOutcome::VerifyFirst => FsmState::S4Verify,
        DecisionOutcome::Escalate => FsmState::S8Escalated,
        DecisionOutcome::Defer | DecisionOutcome::Cancel => FsmState::S7Review,
        DecisionOutcome::Act => FsmState::S3Decide,
    })
}

/// The no-action-without-decision rule.
fn require_act(ledger: &EpisodeLedger, what: &str) -> Result<(), Vec<Diagnostic>> {
    if ledger.last_decision_outcome() == Some(DecisionOutcome::Act) {
        Ok(())
    } else {
        Err(vec![Diagnostic::fsm_error(format!(
            "no action without a decision: {what} requires the most recent Decision to be ACT"
        ))])
    }
}

fn expect_directive(packet: &Packet) -> Result<&TaskDirectivePayload, Vec<Diagnostic>> {
    packet.directive().ok_or_else(|| {
        vec![Diagnostic::fsm_error(
            "TaskDirective packet without a directive payload",
        )]
    })
}

#[cfg(test)]
mod tests {
    use crate::ledger::EpisodeLedger;
    use crate::testing;
    use crate::vocabulary::{
        AlertSeverity, DecisionOutcome, FsmState, StakesLevel, ToolSafetyClass,
    };

    use super::*;

    fn make_ledger(initial_state: FsmState) -> EpisodeLedger {
        let envelope = testing::EnvelopeBuilder::new().build();
        EpisodeLedger::create("corr_fsm", &envelope.budgets, initial_state)
    }

    #[test]
    fn test_idle_admits_observation_only() {
        let ledger = make_ledger(FsmState::S0Idle);
        let observation = testing::observation("corr_fsm", testing::t0());
        let transition = evaluate(&ledger, &observation).unwrap();
        assert_eq!(transition.to, FsmState::S1Sense);

        let belief = testing::belief_update("corr_fsm", testing::t0());
        assert!(evaluate(&ledger, &belief).is_err());
    }

    #[test]
    fn test_decision_requires_model() {
        let mut ledger = make_ledger(FsmState::S0Idle);
        ledger
            .apply(&testing::observation("corr_fsm", testing::t0()))
            .unwrap();
        // S1_SENSE and no belief update yet: a Decision is premature, and
        // also has no legal edge from S1.
        let decision = testing::decision_builder("corr_fsm").build(testing::at(1));
        assert!(ledger.apply(&decision).is_err());
    }

    #[test]
    fn test_seeded_initial_state_counts_as_model() {
        let ledger = make_ledger(FsmState::S3Decide);
        let decision = testing::decision_builder("corr_fsm").build(testing::t0());
        let transition = evaluate(&ledger, &decision).unwrap();
        // ACT stays in S3_DECIDE until a token or directive selects the
        // next state.
        assert_eq!(transition.to, FsmState::S3Decide);
    }

    #[test]
    fn test_decision_outcome_branches() {
        let ledger = make_ledger(FsmState::S3Decide);
        for (outcome, expected) in [
            (DecisionOutcome::VerifyFirst, FsmState::S4Verify),
            (DecisionOutcome::Escalate, FsmState::S8Escalated),
            (DecisionOutcome::Defer, FsmState::S7Review),
            (DecisionOutcome::Cancel, FsmState::S7Review),
            (DecisionOutcome::Act, FsmState::S3Decide),
        ] {
            let decision = testing::decision_builder("corr_fsm")
                .outcome(outcome)
                .build(testing::t0());
            let transition = evaluate(&ledger, &decision).unwrap();
            assert_eq!(transition.to, expected, "outcome {outcome:?}");
        }
    }

    #[test]
    fn test_directive_without_act_decision_rejected() {
        let ledger = make_ledger(FsmState::S3Decide);
        let directive =
            testing::directive_builder("corr_fsm", "task_x").build(testing::t0());
        let result = evaluate(&ledger, &directive);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_directive_after_act_goes_to_execute() {
        let mut ledger = make_ledger(FsmState::S3Decide);
        ledger
            .apply(&testing::decision_builder("corr_fsm").build(testing::t0()))
            .unwrap();
        let directive =
            testing::directive_builder("corr_fsm", "task_x").build(testing::at(1));
        let transition = evaluate(&ledger, &directive).unwrap();
        assert_eq!(transition.to, FsmState::S6Execute);
    }

    #[test]
    fn test_write_directive_from_decide_rejected() {
        let mut ledger = make_ledger(FsmState::S3Decide);
        ledger
            .apply(&testing::decision_builder("corr_fsm").build(testing::t0()))
            .unwrap();
        let directive = testing::directive_builder("corr_fsm", "task_w")
            .safety(ToolSafetyClass::Write)
            .tool("market_api", "write")
            .token("token_w1")
            .build(testing::at(1));
        let result = evaluate(&ledger, &directive);
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_loop_admits_read_only() {
        let mut ledger = make_ledger(FsmState::S3Decide);
        ledger
            .apply(
                &testing::decision_builder("corr_fsm")
                    .outcome(DecisionOutcome::VerifyFirst)
                    .build(testing::t0()),
            )
            .unwrap();
        assert_eq!(ledger.current_state(), FsmState::S4Verify);

        let read = testing::directive_builder("corr_fsm", "task_r").build(testing::at(1));
        assert_eq!(evaluate(&ledger, &read).unwrap().to, FsmState::S4Verify);

        let write = testing::directive_builder("corr_fsm", "task_w")
            .safety(ToolSafetyClass::Mixed)
            .tool("market_api", "write")
            .token("token_w1")
            .build(testing::at(2));
        assert!(evaluate(&ledger, &write).is_err());
    }

    #[test]
    fn test_execute_belief_update_branches_on_open_directives() {
        let mut ledger = make_ledger(FsmState::S3Decide);
        ledger
            .apply(&testing::decision_builder("corr_fsm").build(testing::t0()))
            .unwrap();
        let directive =
            testing::directive_builder("corr_fsm", "task_x").build(testing::at(1));
        ledger.apply(&directive).unwrap();
        assert_eq!(ledger.current_state(), FsmState::S6Execute);

        // Directive still open: belief update loops back to modelling.
        let belief = testing::belief_update("corr_fsm", testing::at(2));
        assert_eq!(evaluate(&ledger, &belief).unwrap().to, FsmState::S2Model);

        // Close it, then the same update completes to review.
        let directive_id = ledger.recent_packets()[1].header.packet_id.clone();
        ledger
            .apply(&testing::task_result(
                "corr_fsm",
                "task_x",
                &directive_id,
                crate::vocabulary::TaskResultStatus::Success,
                testing::at(3),
            ))
            .unwrap();
        assert_eq!(evaluate(&ledger, &belief).unwrap().to, FsmState::S7Review);
    }

    #[test]
    fn test_critical_alert_forces_safemode_from_anywhere() {
        for state in [
            FsmState::S0Idle,
            FsmState::S2Model,
            FsmState::S4Verify,
            FsmState::S6Execute,
            FsmState::S8Escalated,
        ] {
            let ledger = make_ledger(state);
            let alert = testing::integrity_alert(
                "corr_fsm",
                "contract_violation",
                AlertSeverity::Critical,
                testing::t0(),
            );
            let transition = evaluate(&ledger, &alert).unwrap();
            assert_eq!(transition.to, FsmState::S9Safemode, "from {state}");
        }
    }

    #[test]
    fn test_safemode_containment() {
        let ledger = make_ledger(FsmState::S9Safemode);

        let belief = testing::belief_update("corr_fsm", testing::t0());
        assert_eq!(evaluate(&ledger, &belief).unwrap().to, FsmState::S9Safemode);

        let observation = testing::observation("corr_fsm", testing::t0());
        assert!(evaluate(&ledger, &observation).is_err());

        let decision = testing::decision_builder("corr_fsm").build(testing::t0());
        assert!(evaluate(&ledger, &decision).is_err());

        let clear = testing::integrity_alert(
            "corr_fsm",
            "safe_mode_cleared",
            AlertSeverity::Info,
            testing::t0(),
        );
        assert_eq!(evaluate(&ledger, &clear).unwrap().to, FsmState::S7Review);
    }

    #[test]
    fn test_divergent_edges_warn() {
        let ledger = make_ledger(FsmState::S2Model);
        let observation = testing::observation("corr_fsm", testing::t0());
        let transition = evaluate(&ledger, &observation).unwrap();
        assert_eq!(transition.to, FsmState::S1Sense);
        assert_eq!(transition.warnings.len(), 1);

        let ledger = make_ledger(FsmState::S7Review);
        let decision = testing::decision_builder("corr_fsm")
            .stakes(StakesLevel::Low)
            .build(testing::t0());
        let transition = evaluate(&ledger, &decision).unwrap();
        assert_eq!(transition.to, FsmState::S3Decide);
        assert_eq!(transition.warnings.len(), 1);
    }

    #[test]
    fn test_escalation_admitted_in_escalated_state() {
        let ledger = make_ledger(FsmState::S8Escalated);
        let escalation = testing::escalation_builder("corr_fsm").build(testing::t0());
        assert_eq!(
            evaluate(&ledger, &escalation).unwrap().to,
            FsmState::S8Escalated
        );
    }

    #[test]
    fn test_evaluate_lands_inside_transition_targets() {
        // Spot-check that evaluate's outputs agree with the published
        // table; the integration suite replays full episodes against it.
        let ledger = make_ledger(FsmState::S3Decide);
        let decision = testing::decision_builder("corr_fsm")
            .outcome(DecisionOutcome::VerifyFirst)
            .build(testing::t0());
        let transition = evaluate(&ledger, &decision).unwrap();
        let targets = transition_targets(FsmState::S3Decide, PacketKind::Decision);
        assert!(targets.contains(&transition.to));
    }
}
