//! The typed packet model.
//!
//! A packet is a JSON object with three top-level fields: `header`, `mcp`,
//! and `payload`. The payload variant is dispatched on
//! `header.packet_kind`; unknown kinds and kind/payload mismatches are
//! rejected at deserialization time, so a constructed [`Packet`] is always
//! internally consistent on that axis. Everything else (envelope
//! completeness, payload field rules) is the schema validator's job.

mod envelope;
mod header;
pub mod ident;
mod payload;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::vocabulary::PacketKind;

pub use envelope::{
    Budgets, DefinitionOfDone, Epistemics, Evidence, EvidenceRef, Intent, McpEnvelope, Quality,
    RiskBudget, Routing, Stakes,
};
pub use header::PacketHeader;
pub use payload::{
    AuthorizedScope, BeliefChange, BeliefUpdatePayload, ConstraintsSatisfied,
    ContradictionDetails, DecisionPayload, EscalationOption, EscalationPayload, ExecutionMeta,
    IntegrityAlertPayload, LoadBearingAssumption, ObservationPayload, PacketPayload,
    RejectedOption, TaskDirectivePayload, TaskResultPayload, TokenPayload,
    VerificationItem, VerificationPlanPayload, ALERT_TYPE_BUDGET_OVERRIDE,
    TRIGGER_BUDGET_INSUFFICIENT, UPDATE_TYPE_CONTRADICTION_RESOLVED,
};

/// Error raised when decoding a packet from its wire form.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PacketDecodeError {
    /// The JSON was malformed or the payload did not match the declared
    /// kind.
    #[error("packet decode failed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A protocol packet: header, optional policy envelope, and typed payload.
///
/// Packets are immutable once admitted to a ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    /// Identity and routing.
    pub header: PacketHeader,

    /// Policy envelope; mandatory for consequential kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpEnvelope>,

    /// Kind-specific payload.
    pub payload: PacketPayload,
}

impl Packet {
    /// Returns the packet kind from the header.
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        self.header.packet_kind
    }

    /// Returns the policy envelope, when present.
    #[must_use]
    pub const fn envelope(&self) -> Option<&McpEnvelope> {
        self.mcp.as_ref()
    }

    /// Returns the Decision payload, when this is a Decision packet.
    #[must_use]
    pub const fn decision(&self) -> Option<&DecisionPayload> {
        match &self.payload {
            PacketPayload::Decision(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the BeliefUpdate payload, when applicable.
    #[must_use]
    pub const fn belief_update(&self) -> Option<&BeliefUpdatePayload> {
        match &self.payload {
            PacketPayload::BeliefUpdate(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the TaskDirective payload, when applicable.
    #[must_use]
    pub const fn directive(&self) -> Option<&TaskDirectivePayload> {
        match &self.payload {
            PacketPayload::TaskDirective(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the TaskResult payload, when applicable.
    #[must_use]
    pub const fn task_result(&self) -> Option<&TaskResultPayload> {
        match &self.payload {
            PacketPayload::TaskResult(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the token payload, when applicable.
    #[must_use]
    pub const fn token(&self) -> Option<&TokenPayload> {
        match &self.payload {
            PacketPayload::ToolAuthorizationToken(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the Escalation payload, when applicable.
    #[must_use]
    pub const fn escalation(&self) -> Option<&EscalationPayload> {
        match &self.payload {
            PacketPayload::Escalation(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the IntegrityAlert payload, when applicable.
    #[must_use]
    pub const fn integrity_alert(&self) -> Option<&IntegrityAlertPayload> {
        match &self.payload {
            PacketPayload::IntegrityAlert(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the Observation payload, when applicable.
    #[must_use]
    pub const fn observation(&self) -> Option<&ObservationPayload> {
        match &self.payload {
            PacketPayload::Observation(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the VerificationPlan payload, when applicable.
    #[must_use]
    pub const fn verification_plan(&self) -> Option<&VerificationPlanPayload> {
        match &self.payload {
            PacketPayload::VerificationPlan(p) => Some(p),
            _ => None,
        }
    }

    /// Decodes a packet from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `PacketDecodeError` when the JSON is malformed, the kind is
    /// unknown, or the payload does not match the declared kind.
    pub fn from_json_str(s: &str) -> Result<Self, PacketDecodeError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Encodes the packet to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `PacketDecodeError` when serialization fails (only possible
    /// for non-finite floats in opaque payload values).
    pub fn to_json_string(&self) -> Result<String, PacketDecodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<'de> Deserialize<'de> for Packet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawPacket {
            header: PacketHeader,
            #[serde(default)]
            mcp: Option<McpEnvelope>,
            payload: serde_json::Value,
        }

        let raw = RawPacket::deserialize(deserializer)?;
        let payload = match raw.header.packet_kind {
            PacketKind::Observation => serde_json::from_value(raw.payload)
                .map(PacketPayload::Observation)
                .map_err(D::Error::custom)?,
            PacketKind::BeliefUpdate => serde_json::from_value(raw.payload)
                .map(PacketPayload::BeliefUpdate)
                .map_err(D::Error::custom)?,
            PacketKind::Decision => serde_json::from_value(raw.payload)
                .map(PacketPayload::Decision)
                .map_err(D::Error::custom)?,
            PacketKind::VerificationPlan => serde_json::from_value(raw.payload)
                .map(PacketPayload::VerificationPlan)
                .map_err(D::Error::custom)?,
            PacketKind::ToolAuthorizationToken => serde_json::from_value(raw.payload)
                .map(PacketPayload::ToolAuthorizationToken)
                .map_err(D::Error::custom)?,
            PacketKind::TaskDirective => serde_json::from_value(raw.payload)
                .map(PacketPayload::TaskDirective)
                .map_err(D::Error::custom)?,
            PacketKind::TaskResult => serde_json::from_value(raw.payload)
                .map(PacketPayload::TaskResult)
                .map_err(D::Error::custom)?,
            PacketKind::Escalation => serde_json::from_value(raw.payload)
                .map(PacketPayload::Escalation)
                .map_err(D::Error::custom)?,
            PacketKind::IntegrityAlert => serde_json::from_value(raw.payload)
                .map(PacketPayload::IntegrityAlert)
                .map_err(D::Error::custom)?,
        };

        Ok(Self {
            header: raw.header,
            mcp: raw.mcp,
            payload,
        })
    }
}
