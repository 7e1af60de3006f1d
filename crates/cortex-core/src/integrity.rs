//! The integrity overlay.
//!
//! Monitors ledger snapshots and bus traffic across every active episode.
//! It never touches a ledger directly: all authority is exercised through
//! each ledger's control queue (token revocation, safe-mode transitions),
//! which the owning worker drains at its next mutation point.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::bus::BusMessage;
use crate::ledger::{BudgetAxis, LedgerControl, LedgerSnapshot, SafeMode};
use crate::vocabulary::{AlertSeverity, LayerId, StakesLevel};

/// Alert type for the 80% budget threshold.
pub const ALERT_BUDGET_WARNING: &str = "budget_warning";
/// Alert type for the 100% budget threshold.
pub const ALERT_BUDGET_EXCEEDED: &str = "budget_exceeded";
/// Alert type for token revocations.
pub const ALERT_TOKEN_REVOKED: &str = "token_revoked";
/// Alert type for safe-mode transitions.
pub const ALERT_SAFE_MODE: &str = "safe_mode_transition";
/// Alert type carried by a Layer-1 constitutional veto.
pub const ALERT_CONSTITUTIONAL_VETO: &str = "constitutional_veto";

/// Monitor tuning knobs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Budget ratio that triggers a WARNING alert.
    pub warn_ratio: f64,
    /// Budget ratio that triggers the exceeded alert.
    pub exceeded_ratio: f64,
    /// Whether budget exhaustion revokes the episode's tokens.
    pub revoke_tokens_on_exhaustion: bool,
    /// Whether budget exhaustion halts the episode.
    pub halt_on_exhaustion: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            warn_ratio: 0.8,
            exceeded_ratio: 1.0,
            revoke_tokens_on_exhaustion: true,
            halt_on_exhaustion: false,
        }
    }
}

/// A recorded integrity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityEvent {
    /// What kind of event this is.
    pub alert_type: String,
    /// Severity of the event.
    pub severity: AlertSeverity,
    /// Human-readable message.
    pub message: String,
    /// Episode concerned, when episode-scoped.
    pub correlation_id: Option<String>,
    /// Authority exercised in response, when any.
    pub action_taken: Option<String>,
}

#[derive(Debug, Default)]
struct EpisodeEntry {
    control: LedgerControl,
    warned_axes: BTreeSet<BudgetAxis>,
    exceeded_axes: BTreeSet<BudgetAxis>,
    halted: bool,
}

/// Watches every registered episode and enforces integrity constraints.
#[derive(Debug, Default)]
pub struct IntegrityMonitor {
    config: MonitorConfig,
    episodes: BTreeMap<String, EpisodeEntry>,
    events: Vec<IntegrityEvent>,
}

impl IntegrityMonitor {
    /// A monitor with the given config.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            episodes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Registers an episode's control handle for monitoring.
    pub fn register_episode(&mut self, correlation_id: impl Into<String>, control: LedgerControl) {
        self.episodes.insert(
            correlation_id.into(),
            EpisodeEntry {
                control,
                ..EpisodeEntry::default()
            },
        );
    }

    /// Removes an episode from monitoring.
    pub fn unregister_episode(&mut self, correlation_id: &str) {
        self.episodes.remove(correlation_id);
    }

    /// All events recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> &[IntegrityEvent] {
        &self.events
    }

    /// Clears all registrations and recorded events. Test isolation for
    /// the shared instance.
    pub fn reset(&mut self) {
        self.episodes.clear();
        self.events.clear();
    }

    /// Examines a ledger snapshot for budget threshold crossings and
    /// exercises the configured authorities.
    pub fn observe_snapshot(&mut self, snapshot: &LedgerSnapshot) -> Vec<IntegrityEvent> {
        let Some(entry) = self.episodes.get_mut(&snapshot.correlation_id) else {
            return Vec::new();
        };
        let mut emitted = Vec::new();
        let exceeded_severity = if snapshot.stakes_level == StakesLevel::Critical {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        };

        for axis in [
            BudgetAxis::Tokens,
            BudgetAxis::ToolCalls,
            BudgetAxis::TimeSeconds,
            BudgetAxis::Risk,
        ] {
            let Some(ratio) = snapshot.budgets.ratio(axis) else {
                continue;
            };
            if ratio >= self.config.exceeded_ratio && entry.exceeded_axes.insert(axis) {
                let mut action = Vec::new();
                if self.config.revoke_tokens_on_exhaustion {
                    entry.control.revoke_all_tokens("budget exhausted");
                    action.push("revoked all tokens");
                }
                if self.config.halt_on_exhaustion && !entry.halted {
                    entry.control.set_safe_mode(SafeMode::Halted, "budget exhausted");
                    entry.halted = true;
                    action.push("halted");
                }
                emitted.push(IntegrityEvent {
                    alert_type: ALERT_BUDGET_EXCEEDED.to_string(),
                    severity: exceeded_severity,
                    message: format!("{axis} budget exhausted ({:.0}%)", ratio * 100.0),
                    correlation_id: Some(snapshot.correlation_id.clone()),
                    action_taken: (!action.is_empty()).then(|| action.join(", ")),
                });
            } else if ratio >= self.config.warn_ratio && entry.warned_axes.insert(axis) {
                emitted.push(IntegrityEvent {
                    alert_type: ALERT_BUDGET_WARNING.to_string(),
                    severity: AlertSeverity::Warning,
                    message: format!("{axis} budget at {:.0}%", ratio * 100.0),
                    correlation_id: Some(snapshot.correlation_id.clone()),
                    action_taken: None,
                });
            }
        }

        for event in &emitted {
            tracing::warn!(
                correlation_id = %snapshot.correlation_id,
                alert_type = %event.alert_type,
                severity = ?event.severity,
                "{}",
                event.message
            );
        }
        self.events.extend(emitted.clone());
        emitted
    }

    /// Watches bus traffic for integrity-relevant packets; a Layer-1
    /// constitutional veto triggers full revocation and a halt.
    pub fn observe_message(&mut self, message: &BusMessage) -> Option<IntegrityEvent> {
        let alert = message.packet.integrity_alert()?;
        if alert.alert_type == ALERT_CONSTITUTIONAL_VETO
            && message.source_layer == LayerId::Aspirational
        {
            return Some(self.process_veto(&message.correlation_id.clone(), &alert.message.clone()));
        }
        None
    }

    /// Revokes a token by id with a reason.
    ///
    /// Returns false when the episode is not registered.
    pub fn revoke_token(
        &mut self,
        correlation_id: &str,
        token_id: &str,
        reason: &str,
    ) -> bool {
        let Some(entry) = self.episodes.get(correlation_id) else {
            return false;
        };
        entry.control.revoke_token(token_id, reason);
        self.events.push(IntegrityEvent {
            alert_type: ALERT_TOKEN_REVOKED.to_string(),
            severity: AlertSeverity::High,
            message: format!("token {token_id} revoked: {reason}"),
            correlation_id: Some(correlation_id.to_string()),
            action_taken: Some(format!("revoked {token_id}")),
        });
        true
    }

    /// Transitions an episode through the safe-mode ladder.
    ///
    /// Returns false when the episode is not registered.
    pub fn set_safe_mode(&mut self, correlation_id: &str, mode: SafeMode, reason: &str) -> bool {
        let Some(entry) = self.episodes.get_mut(correlation_id) else {
            return false;
        };
        entry.control.set_safe_mode(mode, reason);
        entry.halted = mode == SafeMode::Halted;
        self.events.push(IntegrityEvent {
            alert_type: ALERT_SAFE_MODE.to_string(),
            severity: if mode == SafeMode::Halted {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            },
            message: format!("safe mode set to {mode}: {reason}"),
            correlation_id: Some(correlation_id.to_string()),
            action_taken: Some(format!("safe mode {mode}")),
        });
        true
    }

    /// Processes a Layer-1 constitutional veto: every active token is
    /// revoked and the episode is halted.
    pub fn process_veto(&mut self, correlation_id: &str, reason: &str) -> IntegrityEvent {
        if let Some(entry) = self.episodes.get_mut(correlation_id) {
            entry.control.revoke_all_tokens(format!("constitutional veto: {reason}"));
            entry.control.set_safe_mode(
                SafeMode::Halted,
                format!("constitutional veto: {reason}"),
            );
            entry.halted = true;
        }
        let event = IntegrityEvent {
            alert_type: ALERT_CONSTITUTIONAL_VETO.to_string(),
            severity: AlertSeverity::Critical,
            message: format!("constitutional veto: {reason}"),
            correlation_id: Some(correlation_id.to_string()),
            action_taken: Some("revoked all tokens, halted".to_string()),
        };
        tracing::error!(
            correlation_id = %correlation_id,
            "constitutional veto processed: {reason}"
        );
        self.events.push(event.clone());
        event
    }
}

static SHARED: LazyLock<Mutex<IntegrityMonitor>> =
    LazyLock::new(|| Mutex::new(IntegrityMonitor::new(MonitorConfig::default())));

/// The process-wide monitor instance.
///
/// Tests should prefer dependency-injected instances and call
/// [`reset_shared`] when they do touch this one.
pub fn shared() -> MutexGuard<'static, IntegrityMonitor> {
    match SHARED.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Clears the process-wide monitor.
pub fn reset_shared() {
    shared().reset();
}

#[cfg(test)]
mod tests {
    use crate::bus::BusMessage;
    use crate::ledger::LedgerControl;
    use crate::packet::Budgets;
    use crate::testing;
    use crate::vocabulary::FsmState;

    use super::*;

    fn make_ledger(correlation_id: &str) -> crate::ledger::EpisodeLedger {
        let budgets = Budgets {
            token_budget: 100,
            tool_call_budget: 4,
            time_budget_seconds: 60,
            risk_budget: crate::packet::RiskBudget {
                envelope: "low".to_string(),
                max_loss: serde_json::json!("minimal"),
            },
        };
        crate::ledger::EpisodeLedger::create(correlation_id, &budgets, FsmState::S0Idle)
    }

    #[test]
    fn test_budget_warning_then_exceeded() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let mut ledger = make_ledger("corr_mon");
        monitor.register_episode("corr_mon", ledger.control());

        let _ = ledger.consume(85, 0, 0);
        let events = monitor.observe_snapshot(&ledger.snapshot());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert_type, ALERT_BUDGET_WARNING);
        assert_eq!(events[0].severity, AlertSeverity::Warning);

        // Re-observing the same snapshot emits nothing new.
        assert!(monitor.observe_snapshot(&ledger.snapshot()).is_empty());

        let _ = ledger.consume(20, 0, 0);
        let events = monitor.observe_snapshot(&ledger.snapshot());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert_type, ALERT_BUDGET_EXCEEDED);
        assert_eq!(events[0].severity, AlertSeverity::High);
        assert!(events[0].action_taken.as_deref().unwrap().contains("revoked"));
    }

    #[test]
    fn test_exhaustion_revokes_tokens_through_control_queue() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let mut ledger = make_ledger("corr_mon");
        monitor.register_episode("corr_mon", ledger.control());

        // Get a token into the ledger first.
        ledger
            .apply(&testing::observation("corr_mon", testing::t0()))
            .unwrap();
        ledger
            .apply(&testing::belief_update("corr_mon", testing::at(1)))
            .unwrap();
        ledger
            .apply(&testing::decision_builder("corr_mon").build(testing::at(2)))
            .unwrap();
        ledger
            .apply(&testing::token_builder("corr_mon", "token_w1").build(testing::at(3)))
            .unwrap();

        let _ = ledger.consume(200, 0, 0);
        monitor.observe_snapshot(&ledger.snapshot());

        // The revocation is queued; the ledger applies it at its next
        // drain point.
        let _ = ledger.drain_control();
        assert!(ledger.token("token_w1").unwrap().revoked);
    }

    #[test]
    fn test_unregistered_episode_is_ignored() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let mut ledger = make_ledger("corr_ghost");
        let _ = ledger.consume(1000, 0, 0);
        assert!(monitor.observe_snapshot(&ledger.snapshot()).is_empty());
        assert!(!monitor.revoke_token("corr_ghost", "token_x", "nope"));
    }

    #[test]
    fn test_constitutional_veto_revokes_and_halts() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let mut ledger = make_ledger("corr_veto");
        monitor.register_episode("corr_veto", ledger.control());

        let mut alert = testing::integrity_alert(
            "corr_veto",
            ALERT_CONSTITUTIONAL_VETO,
            AlertSeverity::Critical,
            testing::t0(),
        );
        alert.header.source_layer = crate::vocabulary::LayerId::Aspirational;
        let event = monitor
            .observe_message(&BusMessage::broadcast(alert, testing::t0()))
            .unwrap();
        assert_eq!(event.severity, AlertSeverity::Critical);

        let _ = ledger.drain_control();
        assert_eq!(ledger.safe_mode(), SafeMode::Halted);
        assert_eq!(ledger.current_state(), FsmState::S9Safemode);
    }

    #[test]
    fn test_veto_from_other_layers_is_ignored() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let ledger = make_ledger("corr_veto");
        monitor.register_episode("corr_veto", ledger.control());

        let alert = testing::integrity_alert(
            "corr_veto",
            ALERT_CONSTITUTIONAL_VETO,
            AlertSeverity::Critical,
            testing::t0(),
        );
        // Fixture alerts come from the integrity overlay, not layer 1.
        assert!(monitor
            .observe_message(&BusMessage::broadcast(alert, testing::t0()))
            .is_none());
    }

    #[test]
    fn test_safe_mode_ladder() {
        let mut monitor = IntegrityMonitor::new(MonitorConfig::default());
        let mut ledger = make_ledger("corr_mode");
        monitor.register_episode("corr_mode", ledger.control());

        assert!(monitor.set_safe_mode("corr_mode", SafeMode::Cautious, "verify everything"));
        assert!(monitor.set_safe_mode("corr_mode", SafeMode::Restricted, "no writes"));
        let _ = ledger.drain_control();
        assert_eq!(ledger.safe_mode(), SafeMode::Restricted);
        // Below HALTED the FSM state is untouched.
        assert_eq!(ledger.current_state(), FsmState::S0Idle);
    }

    #[test]
    fn test_monitor_wired_to_bus_processes_veto() {
        use std::sync::{Arc, Mutex};

        let monitor = Arc::new(Mutex::new(IntegrityMonitor::new(MonitorConfig::default())));
        let mut ledger = make_ledger("corr_wire");
        monitor
            .lock()
            .unwrap()
            .register_episode("corr_wire", ledger.control());

        let mut bus = crate::bus::Bus::northbound();
        let subscriber = Arc::clone(&monitor);
        bus.subscribe(crate::vocabulary::LayerId::Integrity, move |message| {
            subscriber
                .lock()
                .map_err(|e| e.to_string())?
                .observe_message(message);
            Ok(())
        });

        let mut alert = testing::integrity_alert(
            "corr_wire",
            ALERT_CONSTITUTIONAL_VETO,
            AlertSeverity::Critical,
            testing::t0(),
        );
        alert.header.source_layer = crate::vocabulary::LayerId::Aspirational;
        bus.publish(BusMessage::broadcast(alert, testing::t0()))
            .unwrap();

        let _ = ledger.drain_control();
        assert_eq!(ledger.safe_mode(), SafeMode::Halted);
        assert_eq!(monitor.lock().unwrap().events().len(), 1);
    }

    #[test]
    fn test_shared_instance_reset() {
        {
            let mut monitor = shared();
            monitor.register_episode("corr_shared", LedgerControl::new());
        }
        reset_shared();
        let mut monitor = shared();
        assert!(monitor.observe_snapshot(&make_ledger("corr_shared").snapshot()).is_empty());
        assert!(monitor.events().is_empty());
    }
}
