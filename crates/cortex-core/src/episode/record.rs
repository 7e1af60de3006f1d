//! Persistent episode records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerSnapshot;
use crate::packet::Packet;
use crate::runner::EpisodeResult;
use crate::vocabulary::{FsmState, LayerId, TemplateId};

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step identifier.
    pub step_id: String,
    /// Position in execution order.
    pub sequence: usize,
    /// Layer that owned the step.
    pub owner_layer: LayerId,
    /// Whether the step succeeded.
    pub success: bool,
    /// What failed, when it did.
    pub error: Option<String>,
    /// Packet ids admitted during the step.
    pub packets_admitted: Vec<String>,
    /// FSM state after the step.
    pub state_after: FsmState,
}

/// Complete record of an executed episode, written to the store on
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Episode identity.
    pub correlation_id: String,
    /// Template the episode ran.
    pub template_id: TemplateId,
    /// Campaign grouping.
    pub campaign_id: Option<String>,
    /// Whether the episode completed successfully.
    pub success: bool,
    /// Final FSM state.
    pub final_state: FsmState,
    /// The step that failed, when one did.
    pub failed_step: Option<String>,
    /// Per-step records in execution order.
    pub steps: Vec<StepRecord>,
    /// Every admitted packet, in admission order.
    pub packets: Vec<Packet>,
    /// Final ledger snapshot.
    pub snapshot: LedgerSnapshot,
    /// When the record was written.
    pub completed_at: DateTime<Utc>,
}

impl EpisodeRecord {
    /// Builds a record from a runner result and the episode's packet log.
    #[must_use]
    pub fn from_result(result: &EpisodeResult, packets: Vec<Packet>, completed_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: result.correlation_id.clone(),
            template_id: result.template_id,
            campaign_id: result.snapshot.campaign_id.clone(),
            success: result.success,
            final_state: result.final_state,
            failed_step: result.failed_step.clone(),
            steps: result
                .steps
                .iter()
                .enumerate()
                .map(|(sequence, step)| StepRecord {
                    step_id: step.step_id.clone(),
                    sequence,
                    owner_layer: step.owner_layer,
                    success: step.success,
                    error: step.error.clone(),
                    packets_admitted: step.admitted.clone(),
                    state_after: step.state_after,
                })
                .collect(),
            packets,
            snapshot: result.snapshot.clone(),
            completed_at,
        }
    }

    /// Number of packets admitted across the episode.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }
}
