//! Mitigation Executor
//!
//! The capability surface the response engine drives, plus the
//! concrete implementation that shells out to the system firewall and
//! VPN tooling. The engine only decides *when* each capability fires
//! and enforces idempotency; the mechanism lives here.

use std::process::Command;

/// Network-defense capability invoked by the response engine.
///
/// The engine guarantees each method is invoked at most once per
/// activation, so implementations need not track their own state.
pub trait MitigationExecutor: Send + Sync {
    fn activate_tunnel(&self) -> Result<(), ExecutorError>;
    fn deactivate_tunnel(&self) -> Result<(), ExecutorError>;
    fn block_ports(&self, ports: &[u16]) -> Result<(), ExecutorError>;
    fn block_all_outbound(&self) -> Result<(), ExecutorError>;
}

/// Shells out to `wg-quick` for the protective tunnel and `netsh`
/// for firewall rules.
pub struct CommandExecutor {
    tunnel_name: String,
}

const RULE_PREFIX: &str = "HostGuard_Block_";
const OUTBOUND_RULE: &str = "HostGuard_Emergency_BlockAll";

impl CommandExecutor {
    pub fn new(tunnel_name: &str) -> Self {
        Self {
            tunnel_name: tunnel_name.to_string(),
        }
    }

    fn run(program: &str, args: &[&str]) -> Result<(), ExecutorError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ExecutorError::Other {
                message: format!("{}: {}", program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutorError::CommandFailed {
                command: program.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

impl MitigationExecutor for CommandExecutor {
    fn activate_tunnel(&self) -> Result<(), ExecutorError> {
        Self::run("wg-quick", &["up", &self.tunnel_name])?;
        log::warn!("Protective tunnel {} activated", self.tunnel_name);
        Ok(())
    }

    fn deactivate_tunnel(&self) -> Result<(), ExecutorError> {
        Self::run("wg-quick", &["down", &self.tunnel_name])?;
        log::info!("Protective tunnel {} deactivated", self.tunnel_name);
        Ok(())
    }

    fn block_ports(&self, ports: &[u16]) -> Result<(), ExecutorError> {
        for port in ports {
            let name = format!("name={}{}", RULE_PREFIX, port);
            let localport = format!("localport={}", port);
            Self::run(
                "netsh",
                &[
                    "advfirewall",
                    "firewall",
                    "add",
                    "rule",
                    &name,
                    "dir=in",
                    "action=block",
                    "protocol=tcp",
                    &localport,
                ],
            )?;
            log::warn!("Blocked inbound port {}", port);
        }
        Ok(())
    }

    fn block_all_outbound(&self) -> Result<(), ExecutorError> {
        let name = format!("name={}", OUTBOUND_RULE);
        Self::run(
            "netsh",
            &[
                "advfirewall",
                "firewall",
                "add",
                "rule",
                &name,
                "dir=out",
                "action=block",
            ],
        )?;
        log::warn!("All outbound traffic blocked");
        Ok(())
    }
}

/// Executor error. Failures are best-effort from the engine's point
/// of view: logged, never fatal, and the risk state still reflects
/// the assessed risk.
#[derive(Debug, Clone)]
pub enum ExecutorError {
    /// Command ran and reported failure
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    /// Other error (e.g. binary not found)
    Other { message: String },
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandFailed {
                command,
                exit_code,
                stderr,
            } => write!(f, "Command '{}' failed ({}): {}", command, exit_code, stderr),
            Self::Other { message } => write!(f, "Error: {}", message),
        }
    }
}

impl std::error::Error for ExecutorError {}
