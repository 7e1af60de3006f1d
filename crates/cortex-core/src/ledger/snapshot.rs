//! Immutable ledger view for persistence and external readers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vocabulary::{DecisionOutcome, FsmState, StakesLevel};

use super::state::{
    ActiveToken, AssumptionEntry, BudgetState, ContradictionEntry, EvidenceEntry, OpenDirective,
    SafeMode,
};

/// A serializable point-in-time view of an episode ledger.
///
/// Snapshots are the only way external readers (integrity overlay,
/// persistence) observe ledger state; the ledger itself stays owned by its
/// episode's worker. Replaying the same admitted packet stream into a
/// fresh ledger reproduces an identical snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Episode identity.
    pub correlation_id: String,
    /// Campaign grouping, when present.
    pub campaign_id: Option<String>,
    /// Admission time of the first packet.
    pub started_at: Option<DateTime<Utc>>,
    /// Current FSM state.
    pub current_state: FsmState,
    /// State the ledger was created in.
    pub initial_state: FsmState,
    /// Current safe mode.
    pub safe_mode: SafeMode,
    /// Highest stakes level seen on any admitted envelope.
    pub stakes_level: StakesLevel,
    /// Budget allocation and usage.
    pub budgets: BudgetState,
    /// Live token table.
    pub active_tokens: BTreeMap<String, ActiveToken>,
    /// Directives awaiting results.
    pub open_directives: BTreeMap<String, OpenDirective>,
    /// Ordered evidence log.
    pub evidence_index: Vec<EvidenceEntry>,
    /// Tracked assumptions.
    pub assumptions: Vec<AssumptionEntry>,
    /// Contradiction markers.
    pub contradictions: Vec<ContradictionEntry>,
    /// Admitted packet ids, in admission order.
    pub packet_ids: Vec<String>,
    /// Whether a belief update has established a world model.
    pub model_established: bool,
    /// Outcome of the most recent decision.
    pub last_decision_outcome: Option<DecisionOutcome>,
    /// Whether a budget overrun has been approved.
    pub overrun_addressed: bool,
    /// Whether the episode has been frozen.
    pub frozen: bool,
}

impl LedgerSnapshot {
    /// Number of packets admitted.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_ids.len()
    }

    /// Unresolved contradiction count.
    #[must_use]
    pub fn unresolved_contradictions(&self) -> usize {
        self.contradictions.iter().filter(|c| !c.resolved).count()
    }
}
