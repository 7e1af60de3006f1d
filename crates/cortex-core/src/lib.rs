//! # cortex-core
//!
//! Protocol runtime for a packet-based cognitive-agent framework. Agents
//! emit a typed stream of packets (observations, beliefs, decisions,
//! directives, results, authorizations, escalations, integrity alerts)
//! inside correlated *episodes*; this crate admits, sequences, and
//! validates those packets so that every episode is reconstructible,
//! policy-compliant, and resource-bounded.
//!
//! ## Architecture
//!
//! - **Vocabulary and packet model**: closed enumerations and the typed
//!   packet sum type with its JSON wire format.
//! - **Validation engine**: three gates run in order by the ledger -
//!   structural schema checks, the per-episode state machine, and twelve
//!   cross-policy invariants.
//! - **Episode ledger**: the single mutable per-episode state object:
//!   budgets, tokens, open directives, evidence, assumptions,
//!   contradictions.
//! - **Templates and runner**: canonical episode topologies (A-H)
//!   compiled against a context and driven step by step through a pool of
//!   external cognitive layers.
//! - **Buses and integrity overlay**: northbound telemetry, southbound
//!   directives, and the monitor that enforces budgets, revocation, and
//!   safe modes across episodes.
//!
//! Cognition itself is external: layers are plug-ins behind the
//! [`layer::Layer`] trait, tools behind [`tool::Tool`], persistence
//! behind [`episode::EpisodeStore`].
//!
//! ## Example
//!
//! ```rust
//! use cortex_core::template::{canonical, compile, CompilationContext};
//! use cortex_core::vocabulary::{QualityTier, StakesLevel, TemplateId, ToolsState};
//!
//! let template = canonical::template(TemplateId::E);
//! let context = CompilationContext::new(
//!     "hand off a contested call",
//!     StakesLevel::High,
//!     QualityTier::Par,
//!     ToolsState::ToolsOk,
//!     chrono::Utc::now(),
//! );
//! let episode = compile(&template, &context).expect("context satisfies template constraints");
//! assert_eq!(episode.template_id, TemplateId::E);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod episode;
pub mod integrity;
pub mod layer;
pub mod ledger;
pub mod packet;
pub mod runner;
pub mod template;
pub mod tool;
pub mod validation;
pub mod vocabulary;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::ledger::{ApplyOutcome, EpisodeLedger, LedgerError, LedgerSnapshot};
    pub use crate::packet::{McpEnvelope, Packet, PacketHeader, PacketPayload};
    pub use crate::runner::{CancelToken, EpisodeResult, EpisodeRunner};
    pub use crate::template::{compile, CompilationContext, CompiledEpisode};
    pub use crate::validation::{validate_structure, ValidationReport};
    pub use crate::vocabulary::{FsmState, LayerId, PacketKind, TemplateId};
}

pub use ledger::EpisodeLedger;
pub use packet::Packet;
pub use runner::EpisodeRunner;
pub use validation::{validate_structure, ValidationReport};
