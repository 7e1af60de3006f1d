//! Identifier allocation and pattern checks.
//!
//! Identifiers are ASCII strings of the form `<prefix>_<slug>` where
//! `<slug>` is `[A-Za-z0-9_-]+`. Fresh identifiers embed a v4 UUID so
//! allocation is collision-free without coordination.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

static PACKET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pkt_[A-Za-z0-9_-]+$").expect("static pattern"));
static CORRELATION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^corr_[A-Za-z0-9_-]+$").expect("static pattern"));
static CAMPAIGN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^camp_[A-Za-z0-9_-]+$").expect("static pattern"));
static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^task_[A-Za-z0-9_-]+$").expect("static pattern"));
static TOKEN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^token_[A-Za-z0-9_-]+$").expect("static pattern"));

/// Allocates a fresh packet identifier.
#[must_use]
pub fn fresh_packet_id() -> String {
    format!("pkt_{}", Uuid::new_v4().simple())
}

/// Allocates a fresh correlation (episode) identifier.
#[must_use]
pub fn fresh_correlation_id() -> String {
    format!("corr_{}", Uuid::new_v4().simple())
}

/// Allocates a fresh campaign identifier.
#[must_use]
pub fn fresh_campaign_id() -> String {
    format!("camp_{}", Uuid::new_v4().simple())
}

/// Allocates a fresh task identifier.
#[must_use]
pub fn fresh_task_id() -> String {
    format!("task_{}", Uuid::new_v4().simple())
}

/// Allocates a fresh token identifier.
#[must_use]
pub fn fresh_token_id() -> String {
    format!("token_{}", Uuid::new_v4().simple())
}

/// Returns true if `s` is a well-formed packet identifier.
#[must_use]
pub fn is_valid_packet_id(s: &str) -> bool {
    PACKET_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed correlation identifier.
#[must_use]
pub fn is_valid_correlation_id(s: &str) -> bool {
    CORRELATION_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed campaign identifier.
#[must_use]
pub fn is_valid_campaign_id(s: &str) -> bool {
    CAMPAIGN_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed task identifier.
#[must_use]
pub fn is_valid_task_id(s: &str) -> bool {
    TASK_ID_RE.is_match(s)
}

/// Returns true if `s` is a well-formed token identifier.
#[must_use]
pub fn is_valid_token_id(s: &str) -> bool {
    TOKEN_ID_RE.is_match(s)
}
