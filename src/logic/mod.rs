//! Agent core subsystems.

pub mod audit;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod orchestrator;
pub mod response;
pub mod rotation;
pub mod shutdown;
pub mod telemetry;
