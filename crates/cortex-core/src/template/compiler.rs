//! Template compilation: binding a topology to a runtime context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packet::{
    ident, Budgets, DefinitionOfDone, Epistemics, Evidence, Intent, McpEnvelope, Quality,
    RiskBudget, Stakes,
};
use crate::vocabulary::{
    DecisionOutcome, EpistemicStatus, FreshnessClass, FsmState, LayerId, PacketKind, QualityTier,
    StakesLevel, TaskClass, TemplateId, ToolsState, VerificationRequirement,
};

use super::{EpisodeTemplate, StepBindings, TemplateError};

/// Errors raised during compilation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// The template definition itself is broken.
    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),

    /// The context's quality tier is below the template's minimum.
    #[error("template {template_id} requires at least {required:?} tier, context has {actual:?}")]
    TierTooLow {
        /// The refused template.
        template_id: TemplateId,
        /// Minimum tier.
        required: QualityTier,
        /// Tier in the context.
        actual: QualityTier,
    },

    /// The context's tools state is not accepted by the template.
    #[error("template {template_id} does not run under {actual}")]
    ToolsStateNotAllowed {
        /// The refused template.
        template_id: TemplateId,
        /// Tools state in the context.
        actual: ToolsState,
    },
}

/// Runtime bindings for template compilation.
///
/// Provides every value needed to pre-fill the policy envelopes of the
/// compiled steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationContext {
    /// Episode id to use; a fresh one is allocated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Campaign grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    /// Intent summary bound into every step envelope.
    pub intent_summary: String,
    /// Intent scope bound into every step envelope.
    pub intent_scope: String,
    /// Stakes assessment for the episode.
    pub stakes: Stakes,
    /// Quality requirements.
    pub quality: Quality,
    /// Resource budgets.
    pub budgets: Budgets,
    /// Tools availability at compile time.
    pub tools_state: ToolsState,
    /// Task classification.
    pub task_class: TaskClass,
    /// Freshness class for bound epistemics.
    pub freshness_class: FreshnessClass,
    /// Compilation timestamp.
    pub created_at: DateTime<Utc>,
}

impl CompilationContext {
    /// A context with consistent stakes axes and protocol-sensible
    /// defaults for the given posture.
    #[must_use]
    pub fn new(
        intent_summary: impl Into<String>,
        stakes_level: StakesLevel,
        tier: QualityTier,
        tools_state: ToolsState,
        created_at: DateTime<Utc>,
    ) -> Self {
        let verification_requirement = match tier {
            QualityTier::Subpar => VerificationRequirement::Optional,
            QualityTier::Par => VerificationRequirement::VerifyOne,
            QualityTier::Superb => VerificationRequirement::VerifyAll,
        };
        Self {
            correlation_id: None,
            campaign_id: None,
            intent_summary: intent_summary.into(),
            intent_scope: "episode".to_string(),
            stakes: Stakes::consistent(stakes_level),
            quality: Quality {
                tier,
                satisficing_mode: tier != QualityTier::Superb,
                definition_of_done: DefinitionOfDone {
                    text: "every step's packet is admitted by all three validators".to_string(),
                    checks: vec!["episode reaches an exit step".to_string()],
                },
                verification_requirement,
            },
            budgets: Budgets {
                token_budget: 2000,
                tool_call_budget: 8,
                time_budget_seconds: 300,
                risk_budget: RiskBudget {
                    envelope: "low".to_string(),
                    max_loss: serde_json::json!("minimal"),
                },
            },
            tools_state,
            task_class: TaskClass::Lookup,
            freshness_class: FreshnessClass::Operational,
            created_at,
        }
    }

    /// Pins the correlation id instead of allocating a fresh one.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the campaign id.
    #[must_use]
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Sets the budget allocations.
    #[must_use]
    pub fn with_budgets(mut self, tokens: u64, tool_calls: u64, time_seconds: u64) -> Self {
        self.budgets.token_budget = tokens;
        self.budgets.tool_call_budget = tool_calls;
        self.budgets.time_budget_seconds = time_seconds;
        self
    }

    /// Sets the task class.
    #[must_use]
    pub const fn with_task_class(mut self, task_class: TaskClass) -> Self {
        self.task_class = task_class;
        self
    }
}

/// One compiled step: the template step plus its bound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStep {
    /// Step identifier.
    pub step_id: String,
    /// Position in the template's step list.
    pub sequence: usize,
    /// Layer expected to produce the packet.
    pub owner_layer: LayerId,
    /// FSM state the step occupies.
    pub fsm_state: FsmState,
    /// Packet kind the layer is expected to emit.
    pub packet_kind: Option<PacketKind>,
    /// Pre-filled policy envelope for the step's packet.
    pub envelope: McpEnvelope,
    /// Template-level bindings (decision outcome, directive safety).
    pub bindings: StepBindings,
    /// Guard for successor selection after a decision.
    pub guard_outcome: Option<DecisionOutcome>,
    /// Successor step ids.
    pub next_steps: Vec<String>,
}

/// A compiled, executable episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledEpisode {
    /// Episode identity.
    pub correlation_id: String,
    /// The source template.
    pub template_id: TemplateId,
    /// Campaign grouping.
    pub campaign_id: Option<String>,
    /// Compiled steps in template order.
    pub steps: Vec<CompiledStep>,
    /// Starting step id.
    pub entry_step: String,
    /// Valid termination step ids.
    pub exit_steps: Vec<String>,
    /// When compilation happened.
    pub compiled_at: DateTime<Utc>,
}

impl CompiledEpisode {
    /// Looks up a compiled step by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&CompiledStep> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// The FSM state the episode's ledger starts in: the state the entry
    /// step occupies.
    #[must_use]
    pub fn initial_state(&self) -> FsmState {
        self.step(&self.entry_step)
            .map_or(FsmState::S0Idle, |step| step.fsm_state)
    }

    /// Returns true when the step id is a valid exit.
    #[must_use]
    pub fn is_exit(&self, step_id: &str) -> bool {
        self.exit_steps.iter().any(|exit| exit == step_id)
    }
}

/// Compiles a template against a context.
///
/// Allocates a fresh correlation id unless the context pins one, binds
/// every step's envelope from the context, and refuses contexts that
/// violate the template's constraints.
///
/// # Errors
///
/// Returns `CompileError` when the template is malformed or the context
/// violates its constraints.
pub fn compile(
    template: &EpisodeTemplate,
    context: &CompilationContext,
) -> Result<CompiledEpisode, CompileError> {
    template.validate()?;

    if context.quality.tier < template.constraints.min_tier {
        return Err(CompileError::TierTooLow {
            template_id: template.template_id,
            required: template.constraints.min_tier,
            actual: context.quality.tier,
        });
    }
    if !template.constraints.tools_states.contains(&context.tools_state) {
        return Err(CompileError::ToolsStateNotAllowed {
            template_id: template.template_id,
            actual: context.tools_state,
        });
    }

    let correlation_id = context
        .correlation_id
        .clone()
        .unwrap_or_else(ident::fresh_correlation_id);

    let steps = template
        .steps
        .iter()
        .enumerate()
        .map(|(sequence, step)| CompiledStep {
            step_id: step.step_id.clone(),
            sequence,
            owner_layer: step.owner_layer,
            fsm_state: step.fsm_state,
            packet_kind: step.packet_kind,
            envelope: bind_envelope(template, context),
            bindings: step.bindings,
            guard_outcome: step.guard_outcome,
            next_steps: step.next_steps.clone(),
        })
        .collect();

    tracing::debug!(
        template_id = %template.template_id,
        correlation_id = %correlation_id,
        "template compiled"
    );

    Ok(CompiledEpisode {
        correlation_id,
        template_id: template.template_id,
        campaign_id: context.campaign_id.clone(),
        steps,
        entry_step: template.entry_step.clone(),
        exit_steps: template.exit_steps.clone(),
        compiled_at: context.created_at,
    })
}

fn bind_envelope(template: &EpisodeTemplate, context: &CompilationContext) -> McpEnvelope {
    McpEnvelope {
        intent: Intent {
            summary: context.intent_summary.clone(),
            scope: context.intent_scope.clone(),
        },
        stakes: context.stakes,
        quality: context.quality.clone(),
        budgets: context.budgets.clone(),
        epistemics: Epistemics {
            status: EpistemicStatus::Derived,
            confidence: 0.75,
            calibration_note: format!("bound at compile time from template {}", template.template_id),
            freshness_class: context.freshness_class,
            stale_if_older_than_seconds: None,
            assumptions: Vec::new(),
        },
        evidence: Evidence::absent("bound before execution; layers attach evidence at runtime"),
        routing: crate::packet::Routing {
            task_class: context.task_class,
            tools_state: context.tools_state,
        },
    }
}
