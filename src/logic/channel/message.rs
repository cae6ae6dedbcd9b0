//! Logical messages carried inside the encrypted plaintext, and the
//! envelope that carries them on the wire.

use serde::{Deserialize, Serialize};

use crate::logic::telemetry::SystemStats;

/// One logical message. The `type` discriminator on the wire selects
/// the variant; unrecognized types deserialize to `Unknown` and are
/// ignored by the receive loop without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Periodic telemetry snapshot pushed to the risk-assessment peer.
    SystemStats(SystemStats),

    /// Rotation announcement. Carries the new version counter, never
    /// the key itself - the peer re-reads the sealed record.
    KeyRotation { version: u64, timestamp: i64 },

    /// Assessed risk from the peer, routed to the response engine.
    RiskAssessment { risk_score: f64 },

    #[serde(other)]
    Unknown,
}

impl Message {
    /// Deserialize a decrypted plaintext body.
    ///
    /// Any body carrying a numeric `risk_score` field is treated as a
    /// risk assessment regardless of its declared `type`; everything
    /// else dispatches on the discriminator.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        if let Some(score) = value.get("risk_score").and_then(|v| v.as_f64()) {
            return Ok(Message::RiskAssessment { risk_score: score });
        }
        serde_json::from_value(value)
    }
}

/// One transport unit: encrypt-then-MAC output plus the per-message
/// IV. Immutable once constructed. Byte fields are hex strings,
/// timestamp is epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub timestamp: i64,
}
