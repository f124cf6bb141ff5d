//! Client for the remote agent's instance management API
//!
//! An agent owns the forwarding instances. The control plane drives it over
//! a small REST surface (`/instances`) and follows its `/events` stream for
//! status, traffic counters and log lines.

pub mod http;
pub mod sse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use http::HttpAgentClient;
pub use sse::SseDecoder;

/// Agent client errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent answered with a non-success status
    #[error("Agent rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response from agent: {0}")]
    InvalidResponse(String),
}

impl AgentError {
    /// The message to surface to operators, without the error-kind prefix
    pub fn message(&self) -> String {
        match self {
            AgentError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AgentError::InvalidResponse(err.to_string())
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}

/// Connection details for one registered agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEndpoint {
    pub id: i32,
    /// e.g. `http://10.0.0.5:3000`
    pub base_url: String,
    /// e.g. `/api`
    pub api_path: String,
    pub api_key: String,
}

impl AgentEndpoint {
    /// Join base URL, API prefix and `path` without doubling slashes
    pub fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let api = self.api_path.trim_matches('/');
        let path = path.trim_start_matches('/');
        if api.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}/{}", base, api, path)
        }
    }
}

/// Instance as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,

    /// `server` or `client`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(rename = "tcprx", default, skip_serializing_if = "Option::is_none")]
    pub tcp_rx: Option<i64>,

    #[serde(rename = "tcptx", default, skip_serializing_if = "Option::is_none")]
    pub tcp_tx: Option<i64>,

    #[serde(rename = "udprx", default, skip_serializing_if = "Option::is_none")]
    pub udp_rx: Option<i64>,

    #[serde(rename = "udptx", default, skip_serializing_if = "Option::is_none")]
    pub udp_tx: Option<i64>,
}

/// Lifecycle command accepted by `PATCH /instances/{id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
}

impl InstanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
            InstanceAction::Restart => "restart",
        }
    }
}

impl FromStr for InstanceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(InstanceAction::Start),
            "stop" => Ok(InstanceAction::Stop),
            "restart" => Ok(InstanceAction::Restart),
            other => Err(format!("unsupported action: {other:?}")),
        }
    }
}

impl fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kind on the agent's `/events` stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentEventKind {
    Initial,
    Create,
    Update,
    Delete,
    Shutdown,
    Log,
    /// Anything this client does not understand yet
    #[serde(other)]
    Unknown,
}

/// One decoded `/events` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: AgentEventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<AgentInstance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl AgentEvent {
    /// Instance id carried by the event, if any
    pub fn instance_id(&self) -> Option<&str> {
        self.instance
            .as_ref()
            .map(|i| i.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Stream of decoded agent events
pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

/// Operations the control plane needs from an agent
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Create an instance from its canonical command URL
    async fn create_instance(
        &self,
        endpoint: &AgentEndpoint,
        command_url: &str,
    ) -> Result<AgentInstance, AgentError>;

    async fn control_instance(
        &self,
        endpoint: &AgentEndpoint,
        instance_id: &str,
        action: InstanceAction,
    ) -> Result<AgentInstance, AgentError>;

    /// Request deletion; completion is announced on the event stream
    async fn delete_instance(
        &self,
        endpoint: &AgentEndpoint,
        instance_id: &str,
    ) -> Result<(), AgentError>;

    /// Subscribe to the agent's event stream
    async fn events(&self, endpoint: &AgentEndpoint) -> Result<AgentEventStream, AgentError>;
}
