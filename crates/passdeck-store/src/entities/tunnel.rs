//! Tunnel entity: the durable mirror of one forwarding rule on a remote agent

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a forwarding pair the agent runs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    /// Listens for tunnel clients and exposes the target
    #[sea_orm(string_value = "server")]
    Server,

    /// Connects to a tunnel server (or forwards directly in single-end mode)
    #[sea_orm(string_value = "client")]
    Client,
}

impl TunnelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelMode::Server => "server",
            TunnelMode::Client => "client",
        }
    }
}

impl FromStr for TunnelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(TunnelMode::Server),
            "client" => Ok(TunnelMode::Client),
            other => Err(format!("unsupported tunnel mode: {other:?}")),
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS mode of the tunnel's control channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "kebab-case")]
pub enum TlsMode {
    #[sea_orm(string_value = "off")]
    Off,

    /// Agent generates a throwaway certificate
    #[sea_orm(string_value = "self-signed")]
    SelfSigned,

    /// Agent loads `cert_path` / `key_path`
    #[sea_orm(string_value = "custom-cert")]
    CustomCert,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Off => "off",
            TlsMode::SelfSigned => "self-signed",
            TlsMode::CustomCert => "custom-cert",
        }
    }

    /// Numeric code used in the `tls=` query parameter
    pub fn code(&self) -> u8 {
        match self {
            TlsMode::Off => 0,
            TlsMode::SelfSigned => 1,
            TlsMode::CustomCert => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TlsMode::Off),
            1 => Some(TlsMode::SelfSigned),
            2 => Some(TlsMode::CustomCert),
            _ => None,
        }
    }
}

impl FromStr for TlsMode {
    type Err = String;

    /// Accepts the canonical names, the legacy `mode0`..`mode2` spelling and
    /// the bare numeric codes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "mode0" | "0" => Ok(TlsMode::Off),
            "self-signed" | "mode1" | "1" => Ok(TlsMode::SelfSigned),
            "custom-cert" | "mode2" | "2" => Ok(TlsMode::CustomCert),
            other => Err(format!("unsupported TLS mode: {other:?}")),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent log verbosity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[sea_orm(string_value = "debug")]
    Debug,
    #[sea_orm(string_value = "info")]
    Info,
    #[sea_orm(string_value = "warn")]
    Warn,
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "event")]
    Event,
    /// Logging disabled on the agent
    #[sea_orm(string_value = "none")]
    #[serde(rename = "none")]
    Silent,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Event => "event",
            LogLevel::Silent => "none",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "event" => Ok(LogLevel::Event),
            "none" => Ok(LogLevel::Silent),
            other => Err(format!("unsupported log level: {other:?}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status mirrored from the agent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    #[sea_orm(string_value = "stopped")]
    Stopped,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "error")]
    Error,
}

impl TunnelStatus {
    /// Map an agent-reported status string; unknown values yield `None`
    pub fn from_agent(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "running" => Some(TunnelStatus::Running),
            "stopped" => Some(TunnelStatus::Stopped),
            "error" => Some(TunnelStatus::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    /// Local id assigned by the control plane
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Instance id assigned by the agent; empty until creation completes
    #[sea_orm(unique, nullable)]
    pub instance_id: Option<String>,

    #[sea_orm(unique)]
    pub name: String,

    pub endpoint_id: i32,

    pub mode: TunnelMode,

    pub tunnel_address: String,

    pub tunnel_port: i32,

    pub target_address: String,

    pub target_port: i32,

    pub tls_mode: TlsMode,

    pub cert_path: Option<String>,

    pub key_path: Option<String>,

    pub log_level: Option<LogLevel>,

    pub min_concurrency: Option<i32>,

    pub max_concurrency: Option<i32>,

    pub status: TunnelStatus,

    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,

    /// Canonical URL last sent to the agent
    #[sea_orm(column_type = "Text")]
    pub command_line: String,

    pub created_at: ChronoDateTimeUtc,

    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    /// The agent-side identifier, if creation has completed
    pub fn instance(&self) -> Option<&str> {
        self.instance_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::endpoint::Entity",
        from = "Column::EndpointId",
        to = "super::endpoint::Column::Id"
    )]
    Endpoint,
}

impl Related<super::endpoint::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Endpoint.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
