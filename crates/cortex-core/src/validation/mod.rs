//! The three-layer validation engine.
//!
//! Packets pass three gates in order: structural schema checks, the
//! per-episode state machine, and the twelve cross-policy invariants.
//! [`crate::ledger::EpisodeLedger::apply`] runs all three and mutates only
//! when every error-severity check passes.

pub mod fsm;
pub mod invariants;
pub mod result;
pub mod schema;

pub use fsm::{EpisodeSignal, FsmTransition};
pub use invariants::FreshnessConfig;
pub use result::{Diagnostic, DiagnosticCode, InvariantCode, Severity, ValidationReport};
pub use schema::validate_structure;
