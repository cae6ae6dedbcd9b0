//! Global constants for the agent core.

/// Default local endpoint the control channel binds to. Single peer,
/// single pending connection - the channel is strictly local.
pub const CHANNEL_ENDPOINT: &str = "127.0.0.1:48620";

/// Maximum size of one transport frame (serialized envelope) in bytes.
/// Oversized payloads are rejected, never silently truncated.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Telemetry push cadence (seconds).
pub const TELEMETRY_INTERVAL_SECS: u64 = 5;

/// Cap on the per-snapshot process list so a frame always fits.
pub const MAX_PROCESSES_PER_SNAPSHOT: usize = 50;

/// Key rotation interval bounds (hours). Each cycle draws a uniform
/// random interval within these.
pub const MIN_ROTATION_HOURS: u64 = 48;
pub const MAX_ROTATION_HOURS: u64 = 72;

/// Inbound ports blocked while Elevated (RDP, SMB).
pub const ATTACK_PORTS: [u16; 2] = [3389, 445];

/// Risk score thresholds. Emergency and Elevated are exclusive on the
/// lower boundary (score must exceed the threshold).
pub const EMERGENCY_THRESHOLD: f64 = 90.0;
pub const ELEVATED_THRESHOLD: f64 = 70.0;
pub const DEESCALATE_THRESHOLD: f64 = 30.0;

/// Sealed key record file name (under the agent data dir).
pub const SEALED_KEY_FILE: &str = "hostguard.key";

/// Audit log file name (under the agent data dir).
pub const AUDIT_LOG_FILE: &str = "hostguard_actions.log";
