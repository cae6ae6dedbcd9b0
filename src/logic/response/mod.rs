//! Response Engine
//!
//! State machine mapping externally supplied risk scores onto
//! network-defense actions. Transitions are a total function of
//! `(current level, incoming score)`; the 30..=70 hysteresis band
//! prevents oscillation at the boundaries.
//!
//! Executor calls run on a dedicated worker thread so the channel
//! receive loop is never coupled to external-tool latency. Firewall
//! rules added during escalation persist through de-escalation until
//! manual cleanup.

mod executor;

pub use executor::{CommandExecutor, ExecutorError, MitigationExecutor};

use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ATTACK_PORTS, DEESCALATE_THRESHOLD, ELEVATED_THRESHOLD, EMERGENCY_THRESHOLD,
};
use crate::logic::audit::AuditSink;

// ============================================================================
// STATE
// ============================================================================

/// Escalation level of the response state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Normal,
    Elevated,
    Emergency,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "normal",
            RiskLevel::Elevated => "elevated",
            RiskLevel::Emergency => "emergency",
        }
    }
}

/// State owned exclusively by the engine; `execute_response` is the
/// only mutator.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub level: RiskLevel,
    pub vpn_active: bool,
    pub last_score: f64,
    outbound_blocked: bool,
    ports_blocked: bool,
}

impl RiskState {
    fn new() -> Self {
        Self {
            level: RiskLevel::Normal,
            vpn_active: false,
            last_score: 0.0,
            outbound_blocked: false,
            ports_blocked: false,
        }
    }
}

#[derive(Debug, Clone)]
enum MitigationCommand {
    ActivateTunnel,
    DeactivateTunnel,
    BlockPorts(Vec<u16>),
    BlockAllOutbound,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ResponseEngine {
    state: Mutex<RiskState>,
    actions: Mutex<Option<mpsc::Sender<MitigationCommand>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    audit: Arc<dyn AuditSink>,
}

impl ResponseEngine {
    pub fn new(executor: Arc<dyn MitigationExecutor>, audit: Arc<dyn AuditSink>) -> Self {
        let (tx, rx) = mpsc::channel::<MitigationCommand>();

        // Executor calls run here so a slow wg-quick or netsh never
        // blocks the channel receive loop.
        let worker = thread::spawn(move || {
            for command in rx {
                if let Err(e) = run_command(executor.as_ref(), &command) {
                    log::warn!("Mitigation action {:?} failed: {}", command, e);
                }
            }
        });

        Self {
            state: Mutex::new(RiskState::new()),
            actions: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            audit,
        }
    }

    /// Apply one risk score. Serialized under an exclusive lock:
    /// concurrent deliveries apply one at a time in arrival order.
    ///
    /// Every executed action appends one audit record before this
    /// returns; re-invoking an already-active effect is a no-op.
    pub fn execute_response(&self, score: f64) {
        let mut state = self.state.lock();
        state.last_score = score;

        if score > EMERGENCY_THRESHOLD {
            state.level = RiskLevel::Emergency;
            if !state.outbound_blocked {
                state.outbound_blocked = true;
                self.dispatch(MitigationCommand::BlockAllOutbound);
                self.audit
                    .append("EMERGENCY_MODE_ACTIVATED", "All outbound traffic blocked");
            }
        } else if score > ELEVATED_THRESHOLD {
            state.level = RiskLevel::Elevated;
            let mut acted = false;
            if !state.vpn_active {
                state.vpn_active = true;
                self.dispatch(MitigationCommand::ActivateTunnel);
                self.audit
                    .append("VPN_ACTIVATED", "Protective tunnel activated");
                acted = true;
            }
            if !state.ports_blocked {
                state.ports_blocked = true;
                self.dispatch(MitigationCommand::BlockPorts(ATTACK_PORTS.to_vec()));
                self.audit
                    .append("PORTS_BLOCKED", "Inbound RDP and SMB ports blocked");
                acted = true;
            }
            if acted {
                self.audit
                    .append("HIGH_RISK_RESPONSE", "VPN activated, firewall modified");
            }
        } else if score < DEESCALATE_THRESHOLD && state.vpn_active {
            state.level = RiskLevel::Normal;
            state.vpn_active = false;
            self.dispatch(MitigationCommand::DeactivateTunnel);
            self.audit
                .append("RISK_DECREASED", "Protective tunnel deactivated");
        }
        // 30..=70 without an active tunnel: hysteresis band, no
        // transition, no action.
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> RiskState {
        self.state.lock().clone()
    }

    /// Close the action queue and join the worker after it drains the
    /// remaining commands.
    pub fn shutdown(&self) {
        self.actions.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn dispatch(&self, command: MitigationCommand) {
        let actions = self.actions.lock();
        match actions.as_ref() {
            Some(tx) => {
                if tx.send(command).is_err() {
                    log::error!("Mitigation worker is gone - action dropped");
                }
            }
            None => log::error!("Engine is shut down - action dropped"),
        }
    }
}

fn run_command(
    executor: &dyn MitigationExecutor,
    command: &MitigationCommand,
) -> Result<(), ExecutorError> {
    match command {
        MitigationCommand::ActivateTunnel => executor.activate_tunnel(),
        MitigationCommand::DeactivateTunnel => executor.deactivate_tunnel(),
        MitigationCommand::BlockPorts(ports) => executor.block_ports(ports),
        MitigationCommand::BlockAllOutbound => executor.block_all_outbound(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every executor call; shared with the test via Arc.
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn count(&self, name: &str) -> usize {
            self.calls.lock().iter().filter(|c| *c == name).count()
        }
    }

    impl MitigationExecutor for RecordingExecutor {
        fn activate_tunnel(&self) -> Result<(), ExecutorError> {
            self.calls.lock().push("activate_tunnel".to_string());
            Ok(())
        }
        fn deactivate_tunnel(&self) -> Result<(), ExecutorError> {
            self.calls.lock().push("deactivate_tunnel".to_string());
            Ok(())
        }
        fn block_ports(&self, _ports: &[u16]) -> Result<(), ExecutorError> {
            self.calls.lock().push("block_ports".to_string());
            Ok(())
        }
        fn block_all_outbound(&self) -> Result<(), ExecutorError> {
            self.calls.lock().push("block_all_outbound".to_string());
            Ok(())
        }
    }

    /// Failing executor: every call errors.
    struct FailingExecutor;

    impl MitigationExecutor for FailingExecutor {
        fn activate_tunnel(&self) -> Result<(), ExecutorError> {
            Err(ExecutorError::Other {
                message: "wg-quick missing".to_string(),
            })
        }
        fn deactivate_tunnel(&self) -> Result<(), ExecutorError> {
            Err(ExecutorError::Other {
                message: "wg-quick missing".to_string(),
            })
        }
        fn block_ports(&self, _ports: &[u16]) -> Result<(), ExecutorError> {
            Err(ExecutorError::Other {
                message: "netsh missing".to_string(),
            })
        }
        fn block_all_outbound(&self) -> Result<(), ExecutorError> {
            Err(ExecutorError::Other {
                message: "netsh missing".to_string(),
            })
        }
    }

    struct RecordingAudit {
        records: Mutex<Vec<String>>,
    }

    impl RecordingAudit {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }
    }

    impl AuditSink for RecordingAudit {
        fn append(&self, action: &str, _details: &str) {
            self.records.lock().push(action.to_string());
        }
    }

    fn engine_with_recorder() -> (ResponseEngine, Arc<RecordingExecutor>, Arc<RecordingAudit>) {
        let executor = RecordingExecutor::new();
        let audit = RecordingAudit::new();
        let engine = ResponseEngine::new(
            Arc::clone(&executor) as Arc<dyn MitigationExecutor>,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        );
        (engine, executor, audit)
    }

    #[test]
    fn test_emergency_threshold_is_exclusive() {
        let (engine, executor, _) = engine_with_recorder();

        engine.execute_response(90.0);
        assert_eq!(engine.state().level, RiskLevel::Elevated);

        engine.execute_response(90.01);
        assert_eq!(engine.state().level, RiskLevel::Emergency);

        engine.shutdown();
        assert_eq!(executor.count("block_all_outbound"), 1);
    }

    #[test]
    fn test_elevated_threshold_is_exclusive() {
        let (engine, executor, _) = engine_with_recorder();

        engine.execute_response(70.0);
        assert_eq!(engine.state().level, RiskLevel::Normal);

        engine.execute_response(70.01);
        assert_eq!(engine.state().level, RiskLevel::Elevated);
        assert!(engine.state().vpn_active);

        engine.shutdown();
        assert_eq!(executor.count("activate_tunnel"), 1);
        assert_eq!(executor.count("block_ports"), 1);
    }

    #[test]
    fn test_repeated_emergency_is_idempotent() {
        let (engine, executor, _) = engine_with_recorder();

        engine.execute_response(95.0);
        engine.execute_response(95.0);
        engine.shutdown();

        assert_eq!(executor.count("block_all_outbound"), 1);
        assert_eq!(executor.count("activate_tunnel"), 0);
    }

    #[test]
    fn test_repeated_elevated_is_idempotent() {
        let (engine, executor, _) = engine_with_recorder();

        engine.execute_response(80.0);
        engine.execute_response(85.0);
        engine.shutdown();

        assert_eq!(executor.count("activate_tunnel"), 1);
        assert_eq!(executor.count("block_ports"), 1);
    }

    #[test]
    fn test_hysteresis_band_holds_state() {
        let (engine, executor, _) = engine_with_recorder();

        for score in [95.0, 50.0, 95.0, 20.0] {
            engine.execute_response(score);
            // 50 does not de-escalate, and neither does 20: the
            // tunnel was never active on the straight path to
            // Emergency, so only the manual-cleanup rules remain.
            assert_eq!(engine.state().level, RiskLevel::Emergency);
        }

        engine.shutdown();
        assert_eq!(executor.count("block_all_outbound"), 1);
        assert_eq!(executor.count("deactivate_tunnel"), 0);
    }

    #[test]
    fn test_deescalation_requires_active_tunnel() {
        let (engine, executor, audit) = engine_with_recorder();

        engine.execute_response(80.0);
        assert!(engine.state().vpn_active);

        engine.execute_response(50.0);
        assert_eq!(engine.state().level, RiskLevel::Elevated);

        engine.execute_response(29.99);
        let state = engine.state();
        assert_eq!(state.level, RiskLevel::Normal);
        assert!(!state.vpn_active);

        engine.shutdown();
        assert_eq!(executor.count("deactivate_tunnel"), 1);
        // De-escalation does not remove the inbound port rules.
        assert_eq!(executor.count("block_ports"), 1);
        assert!(audit.records.lock().contains(&"RISK_DECREASED".to_string()));
    }

    #[test]
    fn test_boundary_30_does_not_deescalate() {
        let (engine, executor, _) = engine_with_recorder();

        engine.execute_response(80.0);
        engine.execute_response(30.0);
        assert_eq!(engine.state().level, RiskLevel::Elevated);
        assert!(engine.state().vpn_active);

        engine.shutdown();
        assert_eq!(executor.count("deactivate_tunnel"), 0);
    }

    #[test]
    fn test_concurrent_deliveries_produce_one_action_set() {
        let (engine, executor, _) = engine_with_recorder();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.execute_response(95.0))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        engine.shutdown();
        assert_eq!(executor.count("block_all_outbound"), 1);
        assert_eq!(engine.state().level, RiskLevel::Emergency);
    }

    #[test]
    fn test_executor_failure_still_transitions() {
        let audit = RecordingAudit::new();
        let engine = ResponseEngine::new(
            Arc::new(FailingExecutor) as Arc<dyn MitigationExecutor>,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        );

        engine.execute_response(95.0);
        engine.shutdown();

        // The state machine reflects assessed risk, not whether the
        // mitigation physically succeeded.
        assert_eq!(engine.state().level, RiskLevel::Emergency);
        assert!(audit
            .records
            .lock()
            .contains(&"EMERGENCY_MODE_ACTIVATED".to_string()));
    }

    #[test]
    fn test_audit_records_per_action() {
        let (engine, _, audit) = engine_with_recorder();

        engine.execute_response(80.0);
        engine.shutdown();

        let records = audit.records.lock();
        assert_eq!(
            *records,
            vec![
                "VPN_ACTIVATED".to_string(),
                "PORTS_BLOCKED".to_string(),
                "HIGH_RISK_RESPONSE".to_string(),
            ]
        );
    }
}
