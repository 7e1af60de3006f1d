//! Layer contracts and the layer pool.
//!
//! Cognition is external: each of the six layers is an opaque function
//! invoked through the [`Layer`] trait. What is internal is the contract:
//! a fixed set of packet kinds each layer may emit and receive. The
//! runner post-filters emissions and pre-filters receptions against these
//! tables.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::packet::Packet;
use crate::runner::CancelToken;
use crate::template::CompiledStep;
use crate::vocabulary::{LayerId, PacketKind};

/// Errors raised by layer invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LayerError {
    /// The invocation observed cancellation and stopped.
    #[error("layer {layer} invocation cancelled")]
    Cancelled {
        /// The cancelled layer.
        layer: LayerId,
    },

    /// The layer is not registered in the pool.
    #[error("layer {layer} is not registered")]
    NotRegistered {
        /// The missing layer.
        layer: LayerId,
    },

    /// The layer failed to produce candidates.
    #[error("layer {layer} invocation failed: {message}")]
    Failed {
        /// The failing layer.
        layer: LayerId,
        /// What went wrong.
        message: String,
    },
}

/// Input handed to a layer for one step.
pub struct LayerInput<'a> {
    /// Packets routed to the layer (already filtered by `can_receive`).
    pub packets: &'a [Packet],
    /// Episode identity.
    pub correlation_id: &'a str,
    /// Campaign grouping, when present.
    pub campaign_id: Option<&'a str>,
    /// The compiled step being executed, including its bound envelope.
    pub step: &'a CompiledStep,
    /// Wall-clock time of the invocation.
    pub now: DateTime<Utc>,
    /// Cooperative cancellation flag; long-running implementations should
    /// poll it.
    pub cancel: &'a CancelToken,
}

/// The external cognition contract.
///
/// Implementations produce candidate packets for a step; the runtime
/// neither knows nor cares how they reason.
pub trait Layer: Send {
    /// Which layer this implementation plays.
    fn layer_id(&self) -> LayerId;

    /// Produces candidate packets for the step.
    ///
    /// # Errors
    ///
    /// Returns `LayerError` on failure or observed cancellation.
    fn invoke(&mut self, input: LayerInput<'_>) -> Result<Vec<Packet>, LayerError>;
}

/// A layer's fixed emission/reception contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerContract {
    /// The layer the contract binds.
    pub layer: LayerId,
    /// Kinds the layer may emit.
    pub can_emit: &'static [PacketKind],
    /// Kinds the layer may receive.
    pub can_receive: &'static [PacketKind],
}

impl LayerContract {
    /// Returns true when the layer may emit the kind.
    #[must_use]
    pub fn allows_emit(&self, kind: PacketKind) -> bool {
        self.can_emit.contains(&kind)
    }

    /// Returns true when the layer may receive the kind.
    #[must_use]
    pub fn allows_receive(&self, kind: PacketKind) -> bool {
        self.can_receive.contains(&kind)
    }
}

/// Layer 1, aspirational: law, posture, vetoes. No directives.
pub const ASPIRATIONAL_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::Aspirational,
    can_emit: &[PacketKind::IntegrityAlert, PacketKind::BeliefUpdate],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::Decision,
        PacketKind::TaskResult,
        PacketKind::Escalation,
        PacketKind::IntegrityAlert,
    ],
};

/// Layer 2, global strategy: campaign framing.
pub const STRATEGY_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::Strategy,
    can_emit: &[PacketKind::BeliefUpdate],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::Decision,
        PacketKind::TaskResult,
        PacketKind::IntegrityAlert,
    ],
};

/// Layer 3, self-model: capability truth, tools state.
pub const SELF_MODEL_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::SelfModel,
    can_emit: &[PacketKind::BeliefUpdate],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::TaskResult,
        PacketKind::IntegrityAlert,
    ],
};

/// Layer 4, executive function: budgets and feasibility.
pub const EXECUTIVE_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::Executive,
    can_emit: &[PacketKind::BeliefUpdate],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::Decision,
        PacketKind::VerificationPlan,
        PacketKind::TaskResult,
        PacketKind::IntegrityAlert,
    ],
};

/// Layer 5, cognitive control: decisions, tokens, directives.
pub const COGNITIVE_CONTROL_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::CognitiveControl,
    can_emit: &[
        PacketKind::Decision,
        PacketKind::VerificationPlan,
        PacketKind::ToolAuthorizationToken,
        PacketKind::TaskDirective,
        PacketKind::Escalation,
        PacketKind::BeliefUpdate,
    ],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::TaskResult,
        PacketKind::IntegrityAlert,
    ],
};

/// Layer 6, task prosecution: execution and grounding.
pub const TASK_PROSECUTION_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::TaskProsecution,
    can_emit: &[
        PacketKind::Observation,
        PacketKind::TaskResult,
        PacketKind::BeliefUpdate,
    ],
    can_receive: &[
        PacketKind::Decision,
        PacketKind::VerificationPlan,
        PacketKind::ToolAuthorizationToken,
        PacketKind::TaskDirective,
        PacketKind::IntegrityAlert,
    ],
};

/// The integrity overlay: alerts only; sees everything.
pub const INTEGRITY_CONTRACT: LayerContract = LayerContract {
    layer: LayerId::Integrity,
    can_emit: &[PacketKind::IntegrityAlert],
    can_receive: &[
        PacketKind::Observation,
        PacketKind::BeliefUpdate,
        PacketKind::Decision,
        PacketKind::VerificationPlan,
        PacketKind::ToolAuthorizationToken,
        PacketKind::TaskDirective,
        PacketKind::TaskResult,
        PacketKind::Escalation,
        PacketKind::IntegrityAlert,
    ],
};

/// The contract for a layer.
#[must_use]
pub const fn contract(layer: LayerId) -> &'static LayerContract {
    match layer {
        LayerId::Aspirational => &ASPIRATIONAL_CONTRACT,
        LayerId::Strategy => &STRATEGY_CONTRACT,
        LayerId::SelfModel => &SELF_MODEL_CONTRACT,
        LayerId::Executive => &EXECUTIVE_CONTRACT,
        LayerId::CognitiveControl => &COGNITIVE_CONTROL_CONTRACT,
        LayerId::TaskProsecution => &TASK_PROSECUTION_CONTRACT,
        LayerId::Integrity => &INTEGRITY_CONTRACT,
    }
}

/// Registry of layer implementations for a runner.
#[derive(Default)]
pub struct LayerPool {
    layers: BTreeMap<LayerId, Box<dyn Layer>>,
}

impl LayerPool {
    /// An empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a layer implementation, replacing any previous one for
    /// the same id.
    pub fn register(&mut self, layer: Box<dyn Layer>) {
        self.layers.insert(layer.layer_id(), layer);
    }

    /// Returns true when an implementation is registered for the id.
    #[must_use]
    pub fn has_layer(&self, layer_id: LayerId) -> bool {
        self.layers.contains_key(&layer_id)
    }

    /// Invokes the layer for a step.
    ///
    /// # Errors
    ///
    /// Returns `LayerError::NotRegistered` for unknown layers, or the
    /// layer's own error.
    pub fn invoke(
        &mut self,
        layer_id: LayerId,
        input: LayerInput<'_>,
    ) -> Result<Vec<Packet>, LayerError> {
        let layer = self
            .layers
            .get_mut(&layer_id)
            .ok_or(LayerError::NotRegistered { layer: layer_id })?;
        layer.invoke(input)
    }
}

impl std::fmt::Debug for LayerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerPool")
            .field("layers", &self.layers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Deterministic layer that replays scripted packet batches.
///
/// Each invocation pops the next batch; an exhausted script produces no
/// candidates. Used by tests and the reference CLI.
#[derive(Debug)]
pub struct ScriptedLayer {
    layer_id: LayerId,
    script: VecDeque<Vec<Packet>>,
}

impl ScriptedLayer {
    /// A scripted layer with no batches.
    #[must_use]
    pub fn new(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            script: VecDeque::new(),
        }
    }

    /// Appends a batch to the script.
    pub fn push_batch(&mut self, batch: Vec<Packet>) {
        self.script.push_back(batch);
    }

    /// Builds a scripted layer from batches.
    #[must_use]
    pub fn with_batches(layer_id: LayerId, batches: impl IntoIterator<Item = Vec<Packet>>) -> Self {
        Self {
            layer_id,
            script: batches.into_iter().collect(),
        }
    }
}

impl Layer for ScriptedLayer {
    fn layer_id(&self) -> LayerId {
        self.layer_id
    }

    fn invoke(&mut self, input: LayerInput<'_>) -> Result<Vec<Packet>, LayerError> {
        if input.cancel.is_cancelled() {
            return Err(LayerError::Cancelled {
                layer: self.layer_id,
            });
        }
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contracts_partition_responsibilities() {
        // Only cognitive control issues directives and tokens.
        for layer in LayerId::COGNITIVE {
            let c = contract(layer);
            let issues_directives = c.allows_emit(PacketKind::TaskDirective);
            assert_eq!(issues_directives, layer == LayerId::CognitiveControl);
        }

        // Only task prosecution emits observations and results.
        for layer in LayerId::COGNITIVE {
            let c = contract(layer);
            assert_eq!(
                c.allows_emit(PacketKind::Observation),
                layer == LayerId::TaskProsecution
            );
            assert_eq!(
                c.allows_emit(PacketKind::TaskResult),
                layer == LayerId::TaskProsecution
            );
        }
    }

    #[test]
    fn test_every_layer_receives_integrity_alerts() {
        for layer in LayerId::COGNITIVE {
            assert!(contract(layer).allows_receive(PacketKind::IntegrityAlert));
        }
    }

    #[test]
    fn test_integrity_sees_everything_emits_alerts_only() {
        let c = contract(LayerId::Integrity);
        assert_eq!(c.can_emit, &[PacketKind::IntegrityAlert]);
        assert_eq!(c.can_receive.len(), 9);
    }

    #[test]
    fn test_pool_registration_and_missing_layer() {
        let mut pool = LayerPool::new();
        assert!(!pool.has_layer(LayerId::TaskProsecution));
        pool.register(Box::new(ScriptedLayer::new(LayerId::TaskProsecution)));
        assert!(pool.has_layer(LayerId::TaskProsecution));
    }

    fn make_input<'a>(step: &'a CompiledStep, cancel: &'a CancelToken) -> LayerInput<'a> {
        LayerInput {
            packets: &[],
            correlation_id: "corr_layer",
            campaign_id: None,
            step,
            now: crate::testing::t0(),
            cancel,
        }
    }

    fn make_compiled() -> crate::template::CompiledEpisode {
        let template = crate::template::canonical::template(crate::vocabulary::TemplateId::A);
        let context = crate::template::CompilationContext::new(
            "scripted",
            crate::vocabulary::StakesLevel::Low,
            crate::vocabulary::QualityTier::Par,
            crate::vocabulary::ToolsState::ToolsOk,
            crate::testing::t0(),
        );
        crate::template::compile(&template, &context).unwrap()
    }

    #[test]
    fn test_scripted_layer_replays_batches_in_order() {
        use crate::testing;

        let first = vec![testing::observation("corr_layer", testing::t0())];
        let second = vec![testing::belief_update("corr_layer", testing::at(1))];
        let mut layer = ScriptedLayer::with_batches(
            LayerId::TaskProsecution,
            [first.clone(), second.clone()],
        );

        let compiled = make_compiled();
        let step = compiled.step("sense").unwrap();
        let cancel = CancelToken::new();

        assert_eq!(layer.invoke(make_input(step, &cancel)).unwrap(), first);
        assert_eq!(layer.invoke(make_input(step, &cancel)).unwrap(), second);
        assert!(layer.invoke(make_input(step, &cancel)).unwrap().is_empty());
    }

    #[test]
    fn test_scripted_layer_observes_cancellation() {
        let mut layer = ScriptedLayer::new(LayerId::TaskProsecution);
        let compiled = make_compiled();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = layer.invoke(make_input(compiled.step("sense").unwrap(), &cancel));
        assert!(matches!(result, Err(LayerError::Cancelled { .. })));
    }
}
