//! `validate packet` and `validate episode`.

use std::path::Path;

use anyhow::{Context, Result};
use cortex_core::episode::log;
use cortex_core::ledger::{EpisodeLedger, LedgerError};
use cortex_core::packet::{Budgets, Packet, RiskBudget};
use cortex_core::validation::{validate_structure, FreshnessConfig};
use cortex_core::vocabulary::FsmState;

/// Runs the schema validator over one packet file. Returns true on pass.
pub fn validate_packet(file: &Path) -> Result<bool> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let packet = match Packet::from_json_str(&raw) {
        Ok(packet) => packet,
        Err(error) => {
            println!("FAIL {}", file.display());
            println!("  [SCHEMA] Error payload: {error}");
            return Ok(false);
        },
    };

    let report = validate_structure(&packet);
    print_report(&report);
    if report.is_valid() {
        println!("PASS {} ({})", file.display(), packet.kind());
        Ok(true)
    } else {
        println!("FAIL {}", file.display());
        Ok(false)
    }
}

/// Runs the full three-gate validation over an episode log. Returns true
/// when every packet is admitted.
pub fn validate_episode(file: &Path, no_timestamp_checks: bool, initial_state: &str) -> Result<bool> {
    let initial_state =
        FsmState::parse(initial_state).with_context(|| format!("--initial-state {initial_state}"))?;
    let packets = log::read_packets(file).with_context(|| format!("reading {}", file.display()))?;
    if packets.is_empty() {
        println!("FAIL {}: empty episode log", file.display());
        return Ok(false);
    }

    // Budgets come from the first enveloped packet, matching how compiled
    // episodes seed their ledgers.
    let budgets = packets
        .iter()
        .find_map(|packet| packet.envelope().map(|envelope| envelope.budgets.clone()))
        .unwrap_or_else(unbudgeted);

    let mut ledger = EpisodeLedger::create(
        packets[0].header.correlation_id.clone(),
        &budgets,
        initial_state,
    );
    if no_timestamp_checks {
        ledger = ledger.with_freshness(FreshnessConfig {
            realtime_window_seconds: u64::MAX,
            operational_window_seconds: u64::MAX,
        });
    }

    let mut passed = true;
    for (index, packet) in packets.iter().enumerate() {
        match ledger.apply(packet) {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    println!("  line {}: {warning}", index + 1);
                }
            },
            Err(LedgerError::PacketRejected { report }) => {
                passed = false;
                println!("FAIL line {} ({})", index + 1, packet.kind());
                print_report(&report);
                break;
            },
            Err(error) => {
                passed = false;
                println!("FAIL line {}: {error}", index + 1);
                break;
            },
        }
    }

    if passed {
        println!(
            "PASS {} ({} packets, final state {})",
            file.display(),
            packets.len(),
            ledger.current_state()
        );
    }
    Ok(passed)
}

fn print_report(report: &cortex_core::validation::ValidationReport) {
    for diagnostic in &report.diagnostics {
        println!("  {diagnostic}");
    }
}

fn unbudgeted() -> Budgets {
    Budgets {
        token_budget: 0,
        tool_call_budget: 0,
        time_budget_seconds: 0,
        risk_budget: RiskBudget {
            envelope: "none".to_string(),
            max_loss: serde_json::json!(null),
        },
    }
}
