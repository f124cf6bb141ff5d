//! Tunnel orchestration core
//!
//! Turns creation requests into agent commands, drives each tunnel through
//! its lifecycle on the remote agents, and keeps the local store in step with
//! what the agents report on their event streams.
//!
//! # Components
//!
//! - [`normalizer`]: structured, quick-URL and template requests to [`CreateCommand`]s
//! - [`TunnelOrchestrator`]: create, control, delete-and-wait, rename, edit
//! - [`BatchExecutor`]: bounded-concurrency batch create and delete
//! - [`EventIngestor`]: applies agent events and confirms pending deletes
//! - [`TelemetryReader`]: log and traffic history per tunnel
//! - [`AuditLog`]: operation history

pub mod ansi;
pub mod audit;
pub mod batch;
pub mod command;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod normalizer;
pub mod orchestrator;
pub mod telemetry;

pub use audit::{AuditLog, OperationStatus};
pub use batch::{BatchExecutor, BatchItemResult, BatchOutcome, ConfigGroup, GroupConfig, StandardBatchItem};
pub use command::CreateCommand;
pub use config::ControlConfig;
pub use confirmation::{ConfirmationHub, DeleteWaiter, WaitOutcome};
pub use error::{ControlError, ErrorKind, PairStep, ReplacePhase, Result};
pub use identity::{IdentityResolver, TunnelRef};
pub use ingest::EventIngestor;
pub use normalizer::{
    CreateRequest, NormalizeContext, NormalizedCreate, PortValue, QuickCreate, RoleDescriptor,
    StructuredCreate, TemplateKind, TemplateRequest,
};
pub use orchestrator::{agent_endpoint, CreatedTunnels, TunnelOrchestrator};
pub use telemetry::{LogLine, TelemetryReader, TrafficSample, TunnelDetails};
