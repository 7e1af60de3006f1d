//! The common packet header: identity, timing, and routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vocabulary::{LayerId, PacketKind};

use super::ident;

/// Common header carried by every packet.
///
/// Provides identification (`packet_id`, `packet_kind`), timing
/// (`created_at`), origin (`source_layer`), episode grouping
/// (`correlation_id`), optional campaign grouping, and optional chaining to
/// the previous packet in the episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Globally unique packet identifier (`pkt_<slug>`).
    pub packet_id: String,

    /// The packet kind; must match the payload variant.
    pub packet_kind: PacketKind,

    /// When the packet was created.
    pub created_at: DateTime<Utc>,

    /// Layer that originated the packet.
    pub source_layer: LayerId,

    /// Episode identifier grouping related packets (`corr_<slug>`).
    pub correlation_id: String,

    /// Optional macro-level campaign grouping (`camp_<slug>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,

    /// Optional reference to the previous packet in the episode chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_packet_id: Option<String>,
}

impl PacketHeader {
    /// Creates a header with a freshly allocated packet id and no campaign
    /// or chain references.
    #[must_use]
    pub fn new(
        packet_kind: PacketKind,
        source_layer: LayerId,
        correlation_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            packet_id: ident::fresh_packet_id(),
            packet_kind,
            created_at,
            source_layer,
            correlation_id: correlation_id.into(),
            campaign_id: None,
            previous_packet_id: None,
        }
    }

    /// Sets the campaign id.
    #[must_use]
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Chains this packet to its predecessor.
    #[must_use]
    pub fn with_previous(mut self, previous_packet_id: impl Into<String>) -> Self {
        self.previous_packet_id = Some(previous_packet_id.into());
        self
    }
}
