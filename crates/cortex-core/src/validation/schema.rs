//! Structural validation of a single packet.
//!
//! First validation gate. Stateless: no ledger, no episode context. All
//! findings are collected into one report so callers see every structural
//! defect at once.

use crate::packet::{
    ident, McpEnvelope, Packet, PacketPayload, UPDATE_TYPE_CONTRADICTION_RESOLVED,
};
use crate::vocabulary::TaskResultStatus;

use super::result::{Diagnostic, ValidationReport};

/// Validates a packet's structure.
///
/// Checks header identifier patterns, envelope presence and ranges for
/// consequential kinds, evidence completeness, and the per-kind payload
/// required-fields rules.
#[must_use]
pub fn validate_structure(packet: &Packet) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_header(packet, &mut report);
    validate_envelope(packet, &mut report);
    validate_payload(packet, &mut report);

    report
}

fn validate_header(packet: &Packet, report: &mut ValidationReport) {
    let header = &packet.header;

    if !ident::is_valid_packet_id(&header.packet_id) {
        report.push(Diagnostic::schema_error(
            "header.packet_id",
            format!("malformed packet id: {}", header.packet_id),
        ));
    }
    if !ident::is_valid_correlation_id(&header.correlation_id) {
        report.push(Diagnostic::schema_error(
            "header.correlation_id",
            format!("malformed correlation id: {}", header.correlation_id),
        ));
    }
    if let Some(campaign_id) = &header.campaign_id {
        if !ident::is_valid_campaign_id(campaign_id) {
            report.push(Diagnostic::schema_error(
                "header.campaign_id",
                format!("malformed campaign id: {campaign_id}"),
            ));
        }
    }
    if let Some(previous) = &header.previous_packet_id {
        if !ident::is_valid_packet_id(previous) {
            report.push(Diagnostic::schema_error(
                "header.previous_packet_id",
                format!("malformed packet id: {previous}"),
            ));
        }
    }

    // A hand-constructed packet can disagree with its own header; the wire
    // decoder cannot produce this, but validate defensively anyway.
    if header.packet_kind != packet.payload.kind() {
        report.push(Diagnostic::schema_error(
            "header.packet_kind",
            format!(
                "header declares {} but payload is {}",
                header.packet_kind,
                packet.payload.kind()
            ),
        ));
    }
}

fn validate_envelope(packet: &Packet, report: &mut ValidationReport) {
    let Some(envelope) = packet.envelope() else {
        if packet.kind().is_consequential() {
            report.push(Diagnostic::schema_error(
                "mcp",
                format!("{} packets require a complete MCP envelope", packet.kind()),
            ));
        }
        return;
    };

    validate_envelope_fields(envelope, packet.kind().is_consequential(), report);
}

fn validate_envelope_fields(
    envelope: &McpEnvelope,
    consequential: bool,
    report: &mut ValidationReport,
) {
    if envelope.intent.summary.trim().is_empty() {
        report.push(Diagnostic::schema_error(
            "mcp.intent.summary",
            "intent summary is empty",
        ));
    }
    if envelope.intent.scope.trim().is_empty() {
        report.push(Diagnostic::schema_error(
            "mcp.intent.scope",
            "intent scope is empty",
        ));
    }

    if consequential && envelope.quality.definition_of_done.checks.is_empty() {
        report.push(Diagnostic::schema_error(
            "mcp.quality.definition_of_done.checks",
            "definition of done needs at least one check",
        ));
    }

    let confidence = envelope.epistemics.confidence;
    if !(0.0..=1.0).contains(&confidence) {
        report.push(Diagnostic::schema_error(
            "mcp.epistemics.confidence",
            format!("confidence out of bounds: {confidence}"),
        ));
    } else if (confidence - 1.0).abs() < f64::EPSILON {
        report.push(Diagnostic::schema_warning(
            "mcp.epistemics.confidence",
            "confidence of 1.0 is rarely justified",
        ));
    }

    // Exactly one of non-empty refs XOR a non-null absence reason.
    let has_refs = !envelope.evidence.evidence_refs.is_empty();
    let has_reason = envelope.evidence.evidence_absent_reason.is_some();
    if has_refs == has_reason {
        let message = if has_refs {
            "evidence carries both refs and an absence reason"
        } else {
            "evidence needs refs or an absence reason"
        };
        report.push(Diagnostic::schema_error("mcp.evidence", message));
    }

    for (i, evidence_ref) in envelope.evidence.evidence_refs.iter().enumerate() {
        if evidence_ref.ref_id.trim().is_empty() {
            report.push(Diagnostic::schema_error(
                format!("mcp.evidence.evidence_refs[{i}].ref_id"),
                "evidence ref id is empty",
            ));
        }
        if let Some(score) = evidence_ref.reliability_score {
            if !(0.0..=1.0).contains(&score) {
                report.push(Diagnostic::schema_error(
                    format!("mcp.evidence.evidence_refs[{i}].reliability_score"),
                    format!("reliability score out of bounds: {score}"),
                ));
            }
        }
    }
}

fn validate_payload(packet: &Packet, report: &mut ValidationReport) {
    match &packet.payload {
        PacketPayload::Observation(payload) => {
            if payload.observation_type.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.observation_type",
                    "observation type is empty",
                ));
            }
            if value_is_empty(&payload.data) {
                report.push(Diagnostic::schema_error(
                    "payload.data",
                    "observation data is empty",
                ));
            }
            if let Some(reliability) = payload.reliability {
                if !(0.0..=1.0).contains(&reliability) {
                    report.push(Diagnostic::schema_error(
                        "payload.reliability",
                        format!("reliability out of bounds: {reliability}"),
                    ));
                }
            }
        },
        PacketPayload::BeliefUpdate(payload) => {
            if payload.update_type.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.update_type",
                    "update type is empty",
                ));
            }
            if payload.belief_changes.is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.belief_changes",
                    "at least one belief change is required",
                ));
            }
            for (i, change) in payload.belief_changes.iter().enumerate() {
                if change.domain.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.belief_changes[{i}].domain"),
                        "belief domain is empty",
                    ));
                }
                if change.key.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.belief_changes[{i}].key"),
                        "belief key is empty",
                    ));
                }
            }
            let is_resolution = payload.update_type == UPDATE_TYPE_CONTRADICTION_RESOLVED;
            if is_resolution && payload.contradiction_details.is_none() {
                report.push(Diagnostic::schema_error(
                    "payload.contradiction_details",
                    "contradiction_resolved updates require contradiction details",
                ));
            }
            if !is_resolution && payload.contradiction_details.is_some() {
                report.push(Diagnostic::schema_error(
                    "payload.contradiction_details",
                    format!(
                        "contradiction details present on a {} update",
                        payload.update_type
                    ),
                ));
            }
        },
        PacketPayload::Decision(payload) => {
            if payload.decision_summary.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.decision_summary",
                    "decision summary is empty",
                ));
            }
            for (i, assumption) in payload.load_bearing_assumptions.iter().enumerate() {
                if assumption.assumption.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.load_bearing_assumptions[{i}].assumption"),
                        "assumption text is empty",
                    ));
                }
            }
        },
        PacketPayload::VerificationPlan(payload) => {
            if payload.items.is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.items",
                    "verification plan needs at least one item",
                ));
            }
            for (i, item) in payload.items.iter().enumerate() {
                if item.claim.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.items[{i}].claim"),
                        "verification claim is empty",
                    ));
                }
            }
        },
        PacketPayload::ToolAuthorizationToken(payload) => {
            if !ident::is_valid_token_id(&payload.token_id) {
                report.push(Diagnostic::schema_error(
                    "payload.token_id",
                    format!("malformed token id: {}", payload.token_id),
                ));
            }
            if payload.authorized_scope.tool_ids.is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.authorized_scope.tool_ids",
                    "token scope needs at least one tool id",
                ));
            }
            if payload.authorized_scope.operation_types.is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.authorized_scope.operation_types",
                    "token scope needs at least one operation type",
                ));
            }
            if payload.max_usage_count == 0 {
                report.push(Diagnostic::schema_error(
                    "payload.max_usage_count",
                    "max usage count must be at least 1",
                ));
            }
            if payload.usage_count > payload.max_usage_count {
                report.push(Diagnostic::schema_error(
                    "payload.usage_count",
                    format!(
                        "usage count {} exceeds max {}",
                        payload.usage_count, payload.max_usage_count
                    ),
                ));
            }
            if payload.revoked && payload.revoked_reason.is_none() {
                report.push(Diagnostic::schema_error(
                    "payload.revoked_reason",
                    "revoked tokens require a revocation reason",
                ));
            }
        },
        PacketPayload::TaskDirective(payload) => {
            if !ident::is_valid_task_id(&payload.task_id) {
                report.push(Diagnostic::schema_error(
                    "payload.task_id",
                    format!("malformed task id: {}", payload.task_id),
                ));
            }
            if payload.task_type.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.task_type",
                    "task type is empty",
                ));
            }
            if payload.execution_method.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.execution_method",
                    "execution method is empty",
                ));
            }
            let needs_token = payload.safety_class().requires_authorization();
            match (&payload.authorization_token_id, needs_token) {
                (None, true) => {
                    report.push(Diagnostic::schema_error(
                        "payload.authorization_token_id",
                        "WRITE/MIXED directives require an authorization token id",
                    ));
                },
                (Some(token_id), true) => {
                    if !ident::is_valid_token_id(token_id) {
                        report.push(Diagnostic::schema_error(
                            "payload.authorization_token_id",
                            format!("malformed token id: {token_id}"),
                        ));
                    }
                },
                (Some(_), false) => {
                    report.push(Diagnostic::schema_error(
                        "payload.authorization_token_id",
                        "READ directives must not carry an authorization token id",
                    ));
                },
                (None, false) => {},
            }
            if needs_token {
                if payload.tool_id.as_deref().is_none_or(|t| t.trim().is_empty()) {
                    report.push(Diagnostic::schema_error(
                        "payload.tool_id",
                        "WRITE/MIXED directives must name the target tool",
                    ));
                }
                if payload
                    .operation_type
                    .as_deref()
                    .is_none_or(|o| o.trim().is_empty())
                {
                    report.push(Diagnostic::schema_error(
                        "payload.operation_type",
                        "WRITE/MIXED directives must name the operation type",
                    ));
                }
            }
        },
        PacketPayload::TaskResult(payload) => {
            if !ident::is_valid_task_id(&payload.task_id) {
                report.push(Diagnostic::schema_error(
                    "payload.task_id",
                    format!("malformed task id: {}", payload.task_id),
                ));
            }
            if !ident::is_valid_packet_id(&payload.directive_packet_id) {
                report.push(Diagnostic::schema_error(
                    "payload.directive_packet_id",
                    format!("malformed packet id: {}", payload.directive_packet_id),
                ));
            }
            let failed = payload.result_status == TaskResultStatus::Failure;
            if failed && payload.error_details.is_none() {
                report.push(Diagnostic::schema_error(
                    "payload.error_details",
                    "FAILURE results require error details",
                ));
            }
            if !failed && payload.error_details.is_some() {
                report.push(Diagnostic::schema_error(
                    "payload.error_details",
                    "error details present on a non-FAILURE result",
                ));
            }
        },
        PacketPayload::Escalation(payload) => {
            if payload.escalation_trigger.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.escalation_trigger",
                    "escalation trigger is empty",
                ));
            }
            if payload.recommended_next_step.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.recommended_next_step",
                    "recommended next step is empty",
                ));
            }
            for (i, option) in payload.top_options.iter().enumerate() {
                if option.option_id.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.top_options[{i}].option_id"),
                        "option id is empty",
                    ));
                }
                if option.description.trim().is_empty() {
                    report.push(Diagnostic::schema_error(
                        format!("payload.top_options[{i}].description"),
                        "option description is empty",
                    ));
                }
            }
        },
        PacketPayload::IntegrityAlert(payload) => {
            if payload.alert_type.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.alert_type",
                    "alert type is empty",
                ));
            }
            if payload.message.trim().is_empty() {
                report.push(Diagnostic::schema_error(
                    "payload.message",
                    "alert message is empty",
                ));
            }
        },
    }
}

/// Empty for the purposes of "non-empty data": null, empty string, empty
/// array, or empty object.
fn value_is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::packet::{Evidence, PacketPayload};
    use crate::testing;
    use crate::vocabulary::{StakesLevel, TaskResultStatus, ToolSafetyClass};

    use super::*;

    #[test]
    fn test_valid_observation_passes() {
        let packet = testing::observation("corr_schema", testing::t0());
        let report = validate_structure(&packet);
        assert!(report.is_valid(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_valid_decision_passes() {
        let packet = testing::decision_builder("corr_schema")
            .stakes(StakesLevel::Medium)
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(report.is_valid(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_consequential_without_envelope_fails() {
        let packet = testing::decision_builder("corr_schema").build_without_envelope(testing::t0());
        let report = validate_structure(&packet);
        assert!(!report.is_valid());
        assert!(report.errors().any(|d| d.field_path == "mcp"));
    }

    #[test]
    fn test_malformed_identifiers_fail() {
        let mut packet = testing::observation("corr_schema", testing::t0());
        packet.header.packet_id = "observation-1".to_string();
        packet.header.correlation_id = "not a correlation id".to_string();
        let report = validate_structure(&packet);
        assert_eq!(report.errors().count(), 2);
    }

    #[test]
    fn test_evidence_both_present_fails() {
        let packet = testing::decision_builder("corr_schema")
            .envelope(|e| {
                e.evidence(Evidence {
                    evidence_refs: vec![testing::tool_evidence("ev_x", testing::t0())],
                    evidence_absent_reason: Some("also absent".to_string()),
                })
            })
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(!report.is_valid());
        assert!(report.errors().any(|d| d.field_path == "mcp.evidence"));
    }

    #[test]
    fn test_evidence_both_missing_fails() {
        let packet = testing::decision_builder("corr_schema")
            .envelope(|e| {
                e.evidence(Evidence {
                    evidence_refs: vec![],
                    evidence_absent_reason: None,
                })
            })
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_confidence_out_of_bounds_fails() {
        let packet = testing::decision_builder("corr_schema")
            .envelope(|e| {
                e.epistemics(
                    crate::vocabulary::EpistemicStatus::Derived,
                    1.3,
                    crate::vocabulary::FreshnessClass::Strategic,
                )
            })
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(report
            .errors()
            .any(|d| d.field_path == "mcp.epistemics.confidence"));
    }

    #[test]
    fn test_full_confidence_warns() {
        let packet = testing::decision_builder("corr_schema")
            .envelope(|e| {
                e.epistemics(
                    crate::vocabulary::EpistemicStatus::Derived,
                    1.0,
                    crate::vocabulary::FreshnessClass::Strategic,
                )
            })
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(report.is_valid());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_empty_dod_checks_fail_for_consequential() {
        let packet = testing::decision_builder("corr_schema")
            .envelope(testing::EnvelopeBuilder::no_checks)
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_write_directive_without_token_fails() {
        let mut packet = testing::directive_builder("corr_schema", "task_w")
            .safety(ToolSafetyClass::Write)
            .build(testing::t0());
        // Builder leaves the token off unless asked for.
        let report = validate_structure(&packet);
        assert!(report
            .errors()
            .any(|d| d.field_path == "payload.authorization_token_id"));

        // And a READ directive must not carry one.
        if let PacketPayload::TaskDirective(payload) = &mut packet.payload {
            payload.tool_safety_class = Some(ToolSafetyClass::Read);
            payload.authorization_token_id = Some("token_x".to_string());
        }
        let report = validate_structure(&packet);
        assert!(report
            .errors()
            .any(|d| d.field_path == "payload.authorization_token_id"));
    }

    #[test]
    fn test_write_directive_with_token_passes() {
        let packet = testing::directive_builder("corr_schema", "task_w")
            .safety(ToolSafetyClass::Write)
            .tool("market_api", "write")
            .token("token_w1")
            .build(testing::t0());
        let report = validate_structure(&packet);
        assert!(report.is_valid(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_failure_result_requires_error_details() {
        let mut packet = testing::task_result(
            "corr_schema",
            "task_v1",
            "pkt_directive",
            TaskResultStatus::Failure,
            testing::t0(),
        );
        if let PacketPayload::TaskResult(payload) = &mut packet.payload {
            payload.error_details = None;
        }
        let report = validate_structure(&packet);
        assert!(report
            .errors()
            .any(|d| d.field_path == "payload.error_details"));
    }

    #[test]
    fn test_success_result_with_error_details_fails() {
        let mut packet = testing::task_result(
            "corr_schema",
            "task_v1",
            "pkt_directive",
            TaskResultStatus::Success,
            testing::t0(),
        );
        if let PacketPayload::TaskResult(payload) = &mut packet.payload {
            payload.error_details = Some("should not be here".to_string());
        }
        let report = validate_structure(&packet);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_contradiction_details_iff_resolution() {
        let missing = testing::belief_update_builder("corr_schema")
            .update_type("contradiction_resolved")
            .build(testing::t0());
        assert!(!validate_structure(&missing).is_valid());

        let spurious = testing::belief_update_builder("corr_schema")
            .contradiction("conflicting readings")
            .build(testing::t0());
        assert!(!validate_structure(&spurious).is_valid());

        let correct = testing::belief_update_builder("corr_schema")
            .update_type("contradiction_resolved")
            .contradiction("conflicting readings")
            .build(testing::t0());
        assert!(validate_structure(&correct).is_valid());
    }

    #[test]
    fn test_empty_belief_changes_fail() {
        let mut packet = testing::belief_update("corr_schema", testing::t0());
        if let PacketPayload::BeliefUpdate(payload) = &mut packet.payload {
            payload.belief_changes.clear();
        }
        let report = validate_structure(&packet);
        assert!(report
            .errors()
            .any(|d| d.field_path == "payload.belief_changes"));
    }

    #[test]
    fn test_all_diagnostics_collected() {
        // Multiple independent defects surface together.
        let mut packet = testing::decision_builder("corr_schema")
            .summary("")
            .envelope(|e| {
                e.no_checks().evidence(Evidence {
                    evidence_refs: vec![],
                    evidence_absent_reason: None,
                })
            })
            .build(testing::t0());
        packet.header.packet_id = "bad".to_string();
        let report = validate_structure(&packet);
        assert!(report.errors().count() >= 4);
    }
}
