//! Secure Channel
//!
//! Frames and transmits authenticated messages over one local duplex
//! byte stream. Wire format: a big-endian u32 length prefix followed
//! by one JSON-encoded [`MessageEnvelope`]. The payload inside is
//! AES-256-CBC encrypted under a fresh per-message IV and
//! authenticated with HMAC-SHA256 over the ciphertext
//! (encrypt-then-MAC). The tag is checked before anything reaches
//! the decryptor.
//!
//! Each direction has exactly one logical owner; send and receive may
//! proceed concurrently on the two halves of a duplex stream.

mod message;

pub use message::{Message, MessageEnvelope};

use std::io::{Read, Write};
use std::sync::Arc;

use crate::constants::MAX_FRAME_BYTES;
use crate::logic::crypto::{CryptoError, KeyStore, IV_LEN};

// ============================================================================
// SEND PATH
// ============================================================================

/// Owner of the outbound half of the channel.
pub struct ChannelSender<W: Write> {
    writer: W,
    store: Arc<KeyStore>,
}

impl<W: Write> ChannelSender<W> {
    pub fn new(writer: W, store: Arc<KeyStore>) -> Self {
        Self { writer, store }
    }

    /// Serialize, encrypt, authenticate and write one frame as a
    /// single atomic transport unit.
    pub fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let plaintext =
            serde_json::to_vec(message).map_err(|e| ChannelError::MalformedMessage {
                reason: e.to_string(),
            })?;

        let (ciphertext, iv) = self.store.encrypt(&plaintext)?;
        let tag = self.store.authenticate(&ciphertext);

        let envelope = MessageEnvelope {
            ciphertext: hex::encode(&ciphertext),
            iv: hex::encode(iv),
            tag: hex::encode(tag),
            timestamp: chrono::Utc::now().timestamp(),
        };

        let frame = serde_json::to_vec(&envelope).map_err(|e| ChannelError::MalformedMessage {
            reason: e.to_string(),
        })?;
        if frame.len() > MAX_FRAME_BYTES {
            return Err(ChannelError::FrameTooLarge { size: frame.len() });
        }

        let len = (frame.len() as u32).to_be_bytes();
        self.writer
            .write_all(&len)
            .and_then(|_| self.writer.write_all(&frame))
            .and_then(|_| self.writer.flush())
            .map_err(|e| ChannelError::TransportWrite {
                source: e.to_string(),
            })
    }
}

// ============================================================================
// RECEIVE PATH
// ============================================================================

/// Owner of the inbound half of the channel.
pub struct ChannelReceiver<R: Read> {
    reader: R,
    store: Arc<KeyStore>,
}

impl<R: Read> ChannelReceiver<R> {
    pub fn new(reader: R, store: Arc<KeyStore>) -> Self {
        Self { reader, store }
    }

    /// Read and open one transport unit.
    ///
    /// The tag is recomputed over the carried ciphertext and compared
    /// in constant time; on mismatch the envelope is discarded with
    /// `Authentication` before any decryption is attempted.
    pub fn receive(&mut self) -> Result<Message, ChannelError> {
        let mut len_buf = [0u8; 4];
        self.reader
            .read_exact(&mut len_buf)
            .map_err(|e| ChannelError::TransportRead {
                source: e.to_string(),
            })?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            // Drain the oversized payload so the next read starts at a
            // frame boundary; only this message is lost.
            std::io::copy(
                &mut self.reader.by_ref().take(len as u64),
                &mut std::io::sink(),
            )
            .map_err(|e| ChannelError::TransportRead {
                source: e.to_string(),
            })?;
            return Err(ChannelError::FrameTooLarge { size: len });
        }

        let mut frame = vec![0u8; len];
        self.reader
            .read_exact(&mut frame)
            .map_err(|e| ChannelError::TransportRead {
                source: e.to_string(),
            })?;

        let envelope: MessageEnvelope =
            serde_json::from_slice(&frame).map_err(|e| ChannelError::MalformedMessage {
                reason: format!("invalid envelope: {}", e),
            })?;
        let ciphertext =
            hex::decode(&envelope.ciphertext).map_err(|_| ChannelError::MalformedMessage {
                reason: "ciphertext is not valid hex".to_string(),
            })?;
        let tag = hex::decode(&envelope.tag).map_err(|_| ChannelError::MalformedMessage {
            reason: "tag is not valid hex".to_string(),
        })?;

        if !self.store.verify(&ciphertext, &tag) {
            return Err(ChannelError::Authentication);
        }

        let iv: [u8; IV_LEN] = hex::decode(&envelope.iv)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| ChannelError::MalformedMessage {
                reason: "invalid envelope IV".to_string(),
            })?;

        let plaintext = self.store.decrypt(&ciphertext, &iv)?;

        // A deserialization failure after successful authentication is
        // a protocol bug on the peer side, not tampering.
        Message::from_slice(&plaintext).map_err(|e| ChannelError::MalformedMessage {
            reason: e.to_string(),
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ChannelError {
    /// Underlying channel read failed (peer gone, stream closed).
    TransportRead { source: String },

    /// Underlying channel write failed (peer gone, buffer full).
    /// Retry policy is the caller's.
    TransportWrite { source: String },

    /// Tag mismatch. The envelope was discarded without decryption.
    Authentication,

    /// Body failed to deserialize after successful authentication.
    MalformedMessage { reason: String },

    /// Frame exceeds the fixed maximum; dropped, never truncated.
    FrameTooLarge { size: usize },

    /// Codec failure (e.g. invalid padding after authentication).
    Crypto(CryptoError),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportRead { source } => write!(f, "transport read failed: {}", source),
            Self::TransportWrite { source } => write!(f, "transport write failed: {}", source),
            Self::Authentication => write!(f, "authentication tag mismatch"),
            Self::MalformedMessage { reason } => write!(f, "malformed message: {}", reason),
            Self::FrameTooLarge { size } => {
                write!(f, "frame of {} bytes exceeds {} byte limit", size, MAX_FRAME_BYTES)
            }
            Self::Crypto(e) => write!(f, "codec failure: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<CryptoError> for ChannelError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn send_to_bytes(store: &Arc<KeyStore>, message: &Message) -> Vec<u8> {
        let mut sender = ChannelSender::new(Vec::new(), Arc::clone(store));
        sender.send(message).unwrap();
        sender.writer
    }

    fn receive_from_bytes(store: &Arc<KeyStore>, bytes: Vec<u8>) -> Result<Message, ChannelError> {
        ChannelReceiver::new(Cursor::new(bytes), Arc::clone(store)).receive()
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let message = Message::RiskAssessment { risk_score: 87.5 };
        let bytes = send_to_bytes(&store, &message);
        assert_eq!(receive_from_bytes(&store, bytes).unwrap(), message);
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let bytes = send_to_bytes(&store, &Message::RiskAssessment { risk_score: 10.0 });

        // Decode the frame, flip one ciphertext bit, rebuild it.
        let mut envelope: MessageEnvelope = serde_json::from_slice(&bytes[4..]).unwrap();
        let mut ciphertext = hex::decode(&envelope.ciphertext).unwrap();
        ciphertext[0] ^= 0x01;
        envelope.ciphertext = hex::encode(&ciphertext);

        let frame = serde_json::to_vec(&envelope).unwrap();
        let mut tampered = (frame.len() as u32).to_be_bytes().to_vec();
        tampered.extend_from_slice(&frame);

        assert!(matches!(
            receive_from_bytes(&store, tampered),
            Err(ChannelError::Authentication)
        ));
    }

    #[test]
    fn test_tampered_tag_fails_authentication() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let bytes = send_to_bytes(&store, &Message::RiskAssessment { risk_score: 10.0 });

        let mut envelope: MessageEnvelope = serde_json::from_slice(&bytes[4..]).unwrap();
        let mut tag = hex::decode(&envelope.tag).unwrap();
        tag[31] ^= 0x80;
        envelope.tag = hex::encode(&tag);

        let frame = serde_json::to_vec(&envelope).unwrap();
        let mut tampered = (frame.len() as u32).to_be_bytes().to_vec();
        tampered.extend_from_slice(&frame);

        assert!(matches!(
            receive_from_bytes(&store, tampered),
            Err(ChannelError::Authentication)
        ));
    }

    #[test]
    fn test_rotation_invalidates_in_flight_frames() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let bytes = send_to_bytes(&store, &Message::RiskAssessment { risk_score: 50.0 });

        store.rotate().unwrap();

        // The frame was tagged under the retired key; it never reaches
        // the decryptor under the new one.
        assert!(matches!(
            receive_from_bytes(&store, bytes),
            Err(ChannelError::Authentication)
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_on_send() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let stats = crate::logic::telemetry::SystemStats {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            network_in_mbps: 0.0,
            network_out_mbps: 0.0,
            process_count: 1,
            processes: vec![crate::logic::telemetry::ProcessInfo {
                pid: 1,
                name: "x".repeat(2 * MAX_FRAME_BYTES),
                cpu: 0.0,
                memory_mb: 0.0,
            }],
            timestamp: 0,
        };
        let mut sender = ChannelSender::new(Vec::new(), Arc::clone(&store));
        assert!(matches!(
            sender.send(&Message::SystemStats(stats)),
            Err(ChannelError::FrameTooLarge { .. })
        ));
        assert!(sender.writer.is_empty());
    }

    #[test]
    fn test_oversized_length_prefix_rejected_on_receive() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let bytes = ((MAX_FRAME_BYTES as u32) + 1).to_be_bytes().to_vec();
        assert!(matches!(
            receive_from_bytes(&store, bytes),
            Err(ChannelError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_does_not_desync_stream() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());

        // One oversized frame, then a valid one on the same stream.
        let junk_len = MAX_FRAME_BYTES + 8;
        let mut bytes = (junk_len as u32).to_be_bytes().to_vec();
        bytes.extend(std::iter::repeat(0xAB).take(junk_len));
        bytes.extend(send_to_bytes(
            &store,
            &Message::RiskAssessment { risk_score: 95.0 },
        ));

        let mut receiver = ChannelReceiver::new(Cursor::new(bytes), Arc::clone(&store));
        assert!(matches!(
            receiver.receive(),
            Err(ChannelError::FrameTooLarge { .. })
        ));
        assert_eq!(
            receiver.receive().unwrap(),
            Message::RiskAssessment { risk_score: 95.0 }
        );
    }

    #[test]
    fn test_unknown_message_type_passes_through() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());

        // Build an envelope around a body type this build does not know.
        let body = br#"{"type":"peer_hello","protocol":1}"#;
        let (ciphertext, iv) = store.encrypt(body).unwrap();
        let envelope = MessageEnvelope {
            tag: hex::encode(store.authenticate(&ciphertext)),
            ciphertext: hex::encode(&ciphertext),
            iv: hex::encode(iv),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let frame = serde_json::to_vec(&envelope).unwrap();
        let mut bytes = (frame.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&frame);

        assert_eq!(receive_from_bytes(&store, bytes).unwrap(), Message::Unknown);
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let mut bytes = send_to_bytes(&store, &Message::RiskAssessment { risk_score: 1.0 });
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            receive_from_bytes(&store, bytes),
            Err(ChannelError::TransportRead { .. })
        ));
    }
}
