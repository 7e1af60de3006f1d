//! The tool execution contract.
//!
//! Tools are the task-prosecution layer's only path to external reality.
//! Every execution returns a bounded result carrying a well-formed
//! evidence reference, and WRITE/MIXED tools refuse to run without a
//! usable authorization token whose scope covers them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ledger::ActiveToken;
use crate::packet::EvidenceRef;
use crate::vocabulary::{EvidenceRefType, ToolSafetyClass};

/// Errors raised by tool execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// The requested name.
        name: String,
    },

    /// A WRITE/MIXED tool was invoked without a usable, in-scope token.
    #[error("tool {name} refused: {reason}")]
    Unauthorized {
        /// The refused tool.
        name: String,
        /// Why authorization failed.
        reason: String,
    },

    /// The tool itself failed.
    #[error("tool {name} failed: {message}")]
    ExecutionFailed {
        /// The failing tool.
        name: String,
        /// What went wrong.
        message: String,
    },
}

/// Result of one tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Whether the execution succeeded.
    pub success: bool,
    /// The returned data.
    pub data: serde_json::Value,
    /// Error text, on failure.
    pub error: Option<String>,
    /// Evidence reference grounding the result.
    pub evidence: EvidenceRef,
}

impl ToolResult {
    /// A successful result with a fresh tool-output evidence reference.
    #[must_use]
    pub fn ok(tool_name: &str, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            evidence: EvidenceRef {
                ref_type: EvidenceRefType::ToolOutput,
                ref_id: format!("ev_{}_{}", tool_name, uuid::Uuid::new_v4().simple()),
                timestamp: now,
                reliability_score: Some(0.95),
            },
        }
    }
}

/// An executable effector.
pub trait Tool: Send {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Safety classification; WRITE/MIXED require a token.
    fn safety(&self) -> ToolSafetyClass;

    /// Executes the tool.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::ExecutionFailed` on failure.
    fn execute(
        &mut self,
        params: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, ToolError>;
}

/// Registry of tools available to the task-prosecution layer.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous one with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Returns true when a tool with this name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of every registered tool.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Executes a tool through the authorization gate.
    ///
    /// READ tools run freely. WRITE/MIXED tools require a token that is
    /// usable at `now` and whose scope names the tool.
    ///
    /// # Errors
    ///
    /// Returns `ToolError` when the tool is unknown, unauthorized, or
    /// fails.
    pub fn execute(
        &mut self,
        name: &str,
        params: &serde_json::Value,
        token: Option<&ActiveToken>,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.tools.get_mut(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;

        if tool.safety().requires_authorization() {
            let Some(token) = token else {
                return Err(ToolError::Unauthorized {
                    name: name.to_string(),
                    reason: "no authorization token supplied".to_string(),
                });
            };
            if !token.is_usable_at(now) {
                return Err(ToolError::Unauthorized {
                    name: name.to_string(),
                    reason: format!("token {} is revoked, expired, or exhausted", token.token_id),
                });
            }
            if !token.scope.tool_ids.iter().any(|id| id == name) {
                return Err(ToolError::Unauthorized {
                    name: name.to_string(),
                    reason: format!("token {} scope does not name this tool", token.token_id),
                });
            }
        }

        tool.execute(params, now)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// Built-in READ tool: reports the invocation time.
#[derive(Debug, Default)]
pub struct ClockTool;

impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Reports the current time"
    }

    fn safety(&self) -> ToolSafetyClass {
        ToolSafetyClass::Read
    }

    fn execute(
        &mut self,
        _params: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(
            self.name(),
            serde_json::json!({ "now": now.to_rfc3339() }),
            now,
        ))
    }
}

/// Built-in WRITE tool: appends entries to an in-memory journal.
#[derive(Debug, Default)]
pub struct JournalTool {
    entries: Vec<serde_json::Value>,
}

impl JournalTool {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries written so far.
    #[must_use]
    pub fn entries(&self) -> &[serde_json::Value] {
        &self.entries
    }
}

impl Tool for JournalTool {
    fn name(&self) -> &str {
        "journal"
    }

    fn description(&self) -> &str {
        "Appends an entry to the episode journal"
    }

    fn safety(&self) -> ToolSafetyClass {
        ToolSafetyClass::Write
    }

    fn execute(
        &mut self,
        params: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, ToolError> {
        self.entries.push(params.clone());
        Ok(ToolResult::ok(
            self.name(),
            serde_json::json!({ "entries": self.entries.len() }),
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::packet::AuthorizedScope;
    use crate::testing;
    use crate::vocabulary::LayerId;

    use super::*;

    fn make_token(tool_ids: &[&str], usable: bool) -> ActiveToken {
        ActiveToken {
            token_id: "token_t".to_string(),
            scope: AuthorizedScope {
                tool_ids: tool_ids.iter().map(ToString::to_string).collect(),
                operation_types: vec!["write".to_string()],
                resource_constraints: None,
            },
            expiry: if usable { testing::at(3600) } else { testing::at(-1) },
            max_usage_count: 1,
            usage_count: 0,
            revoked: false,
            revoked_reason: None,
            issuer_layer: LayerId::CognitiveControl,
        }
    }

    #[test]
    fn test_read_tool_runs_without_token() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ClockTool));

        let result = registry
            .execute("clock", &serde_json::json!({}), None, testing::t0())
            .unwrap();
        assert!(result.success);
        assert_eq!(result.evidence.ref_type, EvidenceRefType::ToolOutput);
        assert_eq!(result.evidence.timestamp, testing::t0());
    }

    #[test]
    fn test_write_tool_refused_without_token() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(JournalTool::new()));

        let result = registry.execute("journal", &serde_json::json!({"note": "x"}), None, testing::t0());
        assert!(matches!(result, Err(ToolError::Unauthorized { .. })));
    }

    #[test]
    fn test_write_tool_runs_with_in_scope_token() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(JournalTool::new()));

        let token = make_token(&["journal"], true);
        let result = registry
            .execute(
                "journal",
                &serde_json::json!({"note": "entry"}),
                Some(&token),
                testing::t0(),
            )
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data["entries"], 1);
    }

    #[test]
    fn test_write_tool_refused_with_out_of_scope_token() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(JournalTool::new()));

        let token = make_token(&["market_api"], true);
        let result = registry.execute(
            "journal",
            &serde_json::json!({}),
            Some(&token),
            testing::t0(),
        );
        assert!(matches!(result, Err(ToolError::Unauthorized { .. })));
    }

    #[test]
    fn test_write_tool_refused_with_expired_token() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(JournalTool::new()));

        let token = make_token(&["journal"], false);
        let result = registry.execute(
            "journal",
            &serde_json::json!({}),
            Some(&token),
            testing::t0(),
        );
        assert!(matches!(result, Err(ToolError::Unauthorized { .. })));
    }

    #[test]
    fn test_unknown_tool() {
        let mut registry = ToolRegistry::new();
        let result = registry.execute("missing", &serde_json::json!({}), None, testing::t0());
        assert!(matches!(result, Err(ToolError::UnknownTool { .. })));
    }
}
