//! Episode templates: canonical recipes compiled into executable step
//! graphs.
//!
//! A template is a directed graph of steps, each owned by a layer and
//! naming the packet kind that layer is expected to emit. Control flow is
//! explicit: successors are listed per step, with optional outcome guards
//! for branching after a decision. No hidden continuation logic.

pub mod canonical;
mod compiler;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vocabulary::{
    DecisionOutcome, FsmState, LayerId, PacketKind, QualityTier, TemplateId, ToolSafetyClass,
    ToolsState,
};

pub use compiler::{compile, CompilationContext, CompileError, CompiledEpisode, CompiledStep};

/// Errors raised by template definition checks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// The template has no steps.
    #[error("template {template_id} has no steps")]
    NoSteps {
        /// The offending template.
        template_id: TemplateId,
    },

    /// A step id is duplicated.
    #[error("template {template_id} duplicates step id {step_id}")]
    DuplicateStepId {
        /// The offending template.
        template_id: TemplateId,
        /// The duplicated id.
        step_id: String,
    },

    /// The entry step, an exit step, or a successor does not exist.
    #[error("template {template_id} references unknown step {step_id}")]
    UnknownStep {
        /// The offending template.
        template_id: TemplateId,
        /// The dangling reference.
        step_id: String,
    },

    /// The template has no exit steps.
    #[error("template {template_id} has no exit steps")]
    NoExitSteps {
        /// The offending template.
        template_id: TemplateId,
    },
}

/// Fixed bindings a step imposes on the packet its owner layer emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBindings {
    /// Required decision outcome, for Decision steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_outcome: Option<DecisionOutcome>,
    /// Required safety class, for TaskDirective steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_safety: Option<ToolSafetyClass>,
}

/// One step in an episode template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
    /// Unique identifier within the template.
    pub step_id: String,
    /// Layer responsible for producing this step's packet.
    pub owner_layer: LayerId,
    /// FSM state the step occupies.
    pub fsm_state: FsmState,
    /// Packet kind the owner layer is expected to emit; `None` for
    /// terminal marker steps.
    pub packet_kind: Option<PacketKind>,
    /// Successor step ids; empty for exit steps.
    #[serde(default)]
    pub next_steps: Vec<String>,
    /// Envelope/payload bindings fixed at template level.
    #[serde(default)]
    pub bindings: StepBindings,
    /// When set, this step is only selected as a successor if the last
    /// decision's outcome matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_outcome: Option<DecisionOutcome>,
}

/// Preconditions for executing a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConstraints {
    /// Minimum quality tier required to compile.
    pub min_tier: QualityTier,
    /// Tools states the template may run under.
    pub tools_states: Vec<ToolsState>,
    /// Whether the template may issue WRITE directives.
    pub write_allowed: bool,
}

/// A canonical episode recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeTemplate {
    /// Canonical identifier (A-H).
    pub template_id: TemplateId,
    /// Human-readable name.
    pub name: String,
    /// What the template does.
    pub description: String,
    /// Execution preconditions.
    pub constraints: TemplateConstraints,
    /// The step graph.
    pub steps: Vec<TemplateStep>,
    /// Starting step id.
    pub entry_step: String,
    /// Valid termination step ids.
    pub exit_steps: Vec<String>,
}

impl EpisodeTemplate {
    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, step_id: &str) -> Option<&TemplateStep> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// Checks graph integrity: non-empty steps, unique ids, and resolvable
    /// entry/exit/successor references.
    ///
    /// # Errors
    ///
    /// Returns the first `TemplateError` found.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.steps.is_empty() {
            return Err(TemplateError::NoSteps {
                template_id: self.template_id,
            });
        }
        if self.exit_steps.is_empty() {
            return Err(TemplateError::NoExitSteps {
                template_id: self.template_id,
            });
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(TemplateError::DuplicateStepId {
                    template_id: self.template_id,
                    step_id: step.step_id.clone(),
                });
            }
        }

        let exists = |id: &str| self.steps.iter().any(|s| s.step_id == id);
        if !exists(&self.entry_step) {
            return Err(TemplateError::UnknownStep {
                template_id: self.template_id,
                step_id: self.entry_step.clone(),
            });
        }
        for exit in &self.exit_steps {
            if !exists(exit) {
                return Err(TemplateError::UnknownStep {
                    template_id: self.template_id,
                    step_id: exit.clone(),
                });
            }
        }
        for step in &self.steps {
            for next in &step.next_steps {
                if !exists(next) {
                    return Err(TemplateError::UnknownStep {
                        template_id: self.template_id,
                        step_id: next.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
