//! Rotation Scheduler
//!
//! Background task that periodically replaces the key material and
//! announces the rotation to the peer. Each cycle draws a uniform
//! random interval within the configured bounds, waits it out
//! interruptibly, rotates the store under its exclusive lock and
//! queues a `key_rotation` control message.
//!
//! The announcement never carries the new key. The peer re-acquires
//! material on its own, by re-reading the sealed key record.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::logic::audit::AuditSink;
use crate::logic::channel::Message;
use crate::logic::crypto::KeyStore;
use crate::logic::shutdown::ShutdownSignal;

pub struct RotationScheduler {
    shutdown: Arc<ShutdownSignal>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RotationScheduler {
    /// Start the scheduler with interval bounds in seconds. The
    /// orchestrator passes the configured hour bounds; tests pass
    /// short ones.
    pub fn start(
        store: Arc<KeyStore>,
        outbound: mpsc::Sender<Message>,
        audit: Arc<dyn AuditSink>,
        min_interval_secs: u64,
        max_interval_secs: u64,
    ) -> Self {
        let shutdown = Arc::new(ShutdownSignal::new());
        let task_shutdown = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            log::info!(
                "Rotation scheduler started (interval {}-{}s)",
                min_interval_secs,
                max_interval_secs
            );
            let mut rng = rand::thread_rng();
            loop {
                let interval = rng.gen_range(min_interval_secs..=max_interval_secs);
                if task_shutdown.wait_for(Duration::from_secs(interval)) {
                    break;
                }
                match store.rotate() {
                    Ok(version) => {
                        let announcement = Message::KeyRotation {
                            version,
                            timestamp: Utc::now().timestamp(),
                        };
                        if outbound.send(announcement).is_err() {
                            log::warn!("Outbound queue closed - rotation announcement dropped");
                        }
                        audit.append(
                            "KEY_ROTATION",
                            &format!("Key material rotated to version {}", version),
                        );
                    }
                    Err(e) => log::error!("Key rotation failed: {}", e),
                }
            }
            log::info!("Rotation scheduler stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Wake any in-progress wait and join the task. Shutdown is never
    /// delayed by the remaining rotation interval.
    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    struct NullAudit {
        records: Mutex<Vec<String>>,
    }

    impl AuditSink for NullAudit {
        fn append(&self, action: &str, _details: &str) {
            self.records.lock().push(action.to_string());
        }
    }

    #[test]
    fn test_rotation_announces_new_version() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let audit = Arc::new(NullAudit {
            records: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::channel();

        let mut scheduler = RotationScheduler::start(
            Arc::clone(&store),
            tx,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
            0,
            0,
        );

        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.stop();

        match message {
            Message::KeyRotation { version, timestamp } => {
                assert_eq!(version, 2);
                assert!(timestamp > 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(store.version() >= 2);
        assert!(audit.records.lock().contains(&"KEY_ROTATION".to_string()));
    }

    #[test]
    fn test_stop_interrupts_multi_hour_wait() {
        let store = Arc::new(KeyStore::ephemeral().unwrap());
        let audit = Arc::new(NullAudit {
            records: Mutex::new(Vec::new()),
        });
        let (tx, _rx) = mpsc::channel();

        let mut scheduler = RotationScheduler::start(
            store,
            tx,
            audit as Arc<dyn AuditSink>,
            48 * 3600,
            72 * 3600,
        );

        let start = Instant::now();
        scheduler.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
