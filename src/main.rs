//! HostGuard Core - Main Entry Point

mod constants;
mod logic;

use std::process::ExitCode;
use std::sync::Arc;

use logic::audit::{AuditSink, FileAuditSink};
use logic::config::AgentConfig;
use logic::crypto::KeyStore;
use logic::orchestrator::ChannelEndpoint;
use logic::response::{CommandExecutor, MitigationExecutor, ResponseEngine};
use logic::telemetry::SysinfoProvider;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting HostGuard Core agent...");

    let config = match AgentConfig::load(std::env::args().nth(1)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // No safe key means no safe channel: key acquisition failures at
    // startup are fatal.
    let store = match KeyStore::open(config.sealed_key_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("FATAL: cannot establish key material: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let audit: Arc<dyn AuditSink> = match FileAuditSink::open(&config.audit_log_path()) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::error!("FATAL: cannot open audit log: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let executor =
        Arc::new(CommandExecutor::new(&config.tunnel_name)) as Arc<dyn MitigationExecutor>;
    let engine = Arc::new(ResponseEngine::new(executor, Arc::clone(&audit)));

    let endpoint = match ChannelEndpoint::bind(&config) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            log::error!("FATAL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut orchestrator = match endpoint.start(
        &config,
        store,
        Arc::clone(&engine),
        audit,
        Box::new(SysinfoProvider::new()),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("FATAL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    orchestrator.run();
    orchestrator.shutdown();

    log::info!("HostGuard Core agent stopped");
    ExitCode::SUCCESS
}
