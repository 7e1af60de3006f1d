//! Validation diagnostics.
//!
//! Validators collect every finding for a packet before reporting, so a
//! single pass surfaces all defects rather than the first one hit.

use serde::{Deserialize, Serialize};

/// The twelve cross-policy invariant codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvariantCode {
    /// MCP completeness.
    Inv001,
    /// SUBPAR never ACTs.
    Inv002,
    /// HIGH/CRITICAL safety.
    Inv003,
    /// No live-truth without evidence.
    Inv004,
    /// Budget overrun approval.
    Inv005,
    /// Arbitration sequence.
    Inv006,
    /// WRITE token scope.
    Inv007,
    /// Verification loop closure.
    Inv008,
    /// Escalation structure.
    Inv009,
    /// Degraded tools policy.
    Inv010,
    /// Task closure.
    Inv011,
    /// Stakes consistency.
    Inv012,
}

impl InvariantCode {
    /// Returns the canonical code string, e.g. `INV-002`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inv001 => "INV-001",
            Self::Inv002 => "INV-002",
            Self::Inv003 => "INV-003",
            Self::Inv004 => "INV-004",
            Self::Inv005 => "INV-005",
            Self::Inv006 => "INV-006",
            Self::Inv007 => "INV-007",
            Self::Inv008 => "INV-008",
            Self::Inv009 => "INV-009",
            Self::Inv010 => "INV-010",
            Self::Inv011 => "INV-011",
            Self::Inv012 => "INV-012",
        }
    }
}

impl std::fmt::Display for InvariantCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which validation gate produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Structural defect found by the schema validator.
    Schema,
    /// Illegal sequencing found by the FSM validator.
    Fsm,
    /// Cross-policy rule violation.
    Invariant(InvariantCode),
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema => f.write_str("SCHEMA"),
            Self::Fsm => f.write_str("FSM"),
            Self::Invariant(code) => f.write_str(code.as_str()),
        }
    }
}

/// Diagnostic severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// Logged but the packet is still admitted.
    Warning,
    /// Rejects the packet.
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Which gate and rule produced the finding.
    pub code: DiagnosticCode,
    /// Severity of the finding.
    pub severity: Severity,
    /// Path of the offending field, e.g. `mcp.epistemics.confidence`.
    pub field_path: String,
    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    /// A schema-gate error.
    #[must_use]
    pub fn schema_error(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: DiagnosticCode::Schema,
            severity: Severity::Error,
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// A schema-gate warning.
    #[must_use]
    pub fn schema_warning(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: DiagnosticCode::Schema,
            severity: Severity::Warning,
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// An FSM-gate error.
    #[must_use]
    pub fn fsm_error(message: impl Into<String>) -> Self {
        Self {
            code: DiagnosticCode::Fsm,
            severity: Severity::Error,
            field_path: "header.packet_kind".to_string(),
            message: message.into(),
        }
    }

    /// An FSM-gate warning.
    #[must_use]
    pub fn fsm_warning(message: impl Into<String>) -> Self {
        Self {
            code: DiagnosticCode::Fsm,
            severity: Severity::Warning,
            field_path: "header.packet_kind".to_string(),
            message: message.into(),
        }
    }

    /// An invariant-gate error.
    #[must_use]
    pub fn invariant_error(
        code: InvariantCode,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: DiagnosticCode::Invariant(code),
            severity: Severity::Error,
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// An invariant-gate warning.
    #[must_use]
    pub fn invariant_warning(
        code: InvariantCode,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: DiagnosticCode::Invariant(code),
            severity: Severity::Warning,
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// Returns true for error-severity findings.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {:?} {}: {}",
            self.code, self.severity, self.field_path, self.message
        )
    }
}

/// All findings for a single packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The findings, in evaluation order.
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// An empty (passing) report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a finding.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Appends all findings from another report.
    pub fn merge(&mut self, other: Self) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// Returns true when no error-severity finding is present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Error-severity findings.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    /// Warning-severity findings.
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    /// Returns true when a finding with the given invariant code is
    /// present.
    #[must_use]
    pub fn has_invariant(&self, code: InvariantCode) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::Invariant(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_is_valid() {
        assert!(ValidationReport::new().is_valid());
    }

    #[test]
    fn test_warning_only_report_is_valid() {
        let mut report = ValidationReport::new();
        report.push(Diagnostic::schema_warning("mcp", "suspicious"));
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.errors().count(), 0);
    }

    #[test]
    fn test_error_report_is_invalid() {
        let mut report = ValidationReport::new();
        report.push(Diagnostic::schema_error("header.packet_id", "bad pattern"));
        assert!(!report.is_valid());
    }

    #[test]
    fn test_invariant_code_display() {
        assert_eq!(InvariantCode::Inv002.to_string(), "INV-002");
        assert_eq!(
            DiagnosticCode::Invariant(InvariantCode::Inv012).to_string(),
            "INV-012"
        );
        assert_eq!(DiagnosticCode::Schema.to_string(), "SCHEMA");
    }

    #[test]
    fn test_has_invariant() {
        let mut report = ValidationReport::new();
        report.push(Diagnostic::invariant_error(
            InvariantCode::Inv007,
            "payload.authorization_token_id",
            "token expired",
        ));
        assert!(report.has_invariant(InvariantCode::Inv007));
        assert!(!report.has_invariant(InvariantCode::Inv002));
    }
}
