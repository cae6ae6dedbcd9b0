//! Orchestrator
//!
//! Wires Telemetry Provider -> Channel (outbound) and Channel
//! (inbound) -> Response Engine, and owns every task lifecycle.
//!
//! Four long-lived tasks run concurrently: the outbound writer (the
//! single logical owner of the send direction; telemetry and the
//! rotation scheduler both feed it through one queue), the telemetry
//! loop, the rotation scheduler and the receive loop. The receive
//! loop runs on the caller's thread via [`Orchestrator::run`].

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::logic::audit::AuditSink;
use crate::logic::channel::{ChannelError, ChannelReceiver, ChannelSender, Message};
use crate::logic::config::AgentConfig;
use crate::logic::crypto::KeyStore;
use crate::logic::response::ResponseEngine;
use crate::logic::rotation::RotationScheduler;
use crate::logic::shutdown::ShutdownSignal;
use crate::logic::telemetry::TelemetryProvider;

/// Bound but not yet connected channel endpoint. Separating bind from
/// accept lets callers learn the local address before the peer dials
/// in.
pub struct ChannelEndpoint {
    listener: TcpListener,
}

impl ChannelEndpoint {
    /// Bind the configured endpoint. One pending connection at a
    /// time: exactly one logical owner of the encrypted stream.
    pub fn bind(config: &AgentConfig) -> Result<Self, OrchestratorError> {
        let listener =
            TcpListener::bind(&config.channel_endpoint).map_err(|e| OrchestratorError::Bind {
                endpoint: config.channel_endpoint.clone(),
                source: e.to_string(),
            })?;
        log::info!("Control channel listening on {}", config.channel_endpoint);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, OrchestratorError> {
        self.listener
            .local_addr()
            .map_err(|e| OrchestratorError::Stream {
                source: e.to_string(),
            })
    }

    /// Block until the single peer connects, then start every task.
    pub fn start(
        self,
        config: &AgentConfig,
        store: Arc<KeyStore>,
        engine: Arc<ResponseEngine>,
        audit: Arc<dyn AuditSink>,
        mut telemetry: Box<dyn TelemetryProvider>,
    ) -> Result<Orchestrator, OrchestratorError> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| OrchestratorError::Accept {
                source: e.to_string(),
            })?;
        log::info!("Peer connected from {}", peer);

        let reader = stream.try_clone().map_err(|e| OrchestratorError::Stream {
            source: e.to_string(),
        })?;
        let writer = stream.try_clone().map_err(|e| OrchestratorError::Stream {
            source: e.to_string(),
        })?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>();
        let mut threads = Vec::new();

        // Outbound writer: sole owner of the send direction.
        let mut sender = ChannelSender::new(writer, Arc::clone(&store));
        threads.push(thread::spawn(move || {
            for message in outbound_rx {
                if let Err(e) = sender.send(&message) {
                    log::warn!("Channel send failed: {}", e);
                }
            }
            log::info!("Outbound writer stopped");
        }));

        // Telemetry push loop.
        let telemetry_tx = outbound_tx.clone();
        let telemetry_shutdown = Arc::clone(&shutdown);
        let interval = Duration::from_secs(config.telemetry_interval_secs);
        threads.push(thread::spawn(move || {
            log::info!("Telemetry loop started ({}s cadence)", interval.as_secs());
            loop {
                let stats = telemetry.snapshot();
                if telemetry_tx.send(Message::SystemStats(stats)).is_err() {
                    break;
                }
                if telemetry_shutdown.wait_for(interval) {
                    break;
                }
            }
            log::info!("Telemetry loop stopped");
        }));

        let rotation = RotationScheduler::start(
            Arc::clone(&store),
            outbound_tx.clone(),
            audit,
            config.rotation_min_hours * 3600,
            config.rotation_max_hours * 3600,
        );

        Ok(Orchestrator {
            shutdown,
            stream,
            receiver: Some(ChannelReceiver::new(reader, store)),
            engine,
            rotation,
            outbound_tx: Some(outbound_tx),
            threads,
        })
    }
}

pub struct Orchestrator {
    shutdown: Arc<ShutdownSignal>,
    stream: TcpStream,
    receiver: Option<ChannelReceiver<TcpStream>>,
    engine: Arc<ResponseEngine>,
    rotation: RotationScheduler,
    outbound_tx: Option<mpsc::Sender<Message>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Orchestrator {
    /// Receive loop: routes inbound messages until the peer
    /// disconnects or shutdown is triggered. Cryptographic and
    /// framing failures are local to one message and never terminate
    /// the loop.
    pub fn run(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        log::info!("Receive loop started");
        loop {
            match receiver.receive() {
                Ok(Message::RiskAssessment { risk_score }) => {
                    self.engine.execute_response(risk_score);
                }
                Ok(Message::KeyRotation { version, .. }) => {
                    log::info!("Peer announced key rotation to version {}", version);
                }
                Ok(Message::SystemStats(_)) => {
                    // Telemetry is outbound-only; an echo is harmless.
                }
                Ok(Message::Unknown) => {
                    log::debug!("Ignoring message with unrecognized type");
                }
                Err(ChannelError::TransportRead { source }) => {
                    if !self.shutdown.is_triggered() {
                        log::info!("Channel read ended: {}", source);
                    }
                    break;
                }
                Err(e) => {
                    log::warn!("Dropping message: {}", e);
                }
            }
        }
        log::info!("Receive loop stopped");
    }

    /// Stop every task: wake all waits, unblock any in-progress
    /// channel read, drain and join.
    pub fn shutdown(mut self) {
        log::info!("Shutting down agent tasks");
        self.shutdown.trigger();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.rotation.stop();
        drop(self.outbound_tx.take());
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.engine.shutdown();
    }
}

#[derive(Debug)]
pub enum OrchestratorError {
    Bind { endpoint: String, source: String },
    Accept { source: String },
    Stream { source: String },
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind { endpoint, source } => {
                write!(f, "cannot bind channel endpoint {}: {}", endpoint, source)
            }
            Self::Accept { source } => write!(f, "cannot accept peer connection: {}", source),
            Self::Stream { source } => write!(f, "channel stream error: {}", source),
        }
    }
}

impl std::error::Error for OrchestratorError {}
