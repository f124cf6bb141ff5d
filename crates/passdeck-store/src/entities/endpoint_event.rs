//! EndpointEvent entity: append-only telemetry pushed by agents
//!
//! Rows are keyed by `(endpoint_id, instance_id)` and ordered by
//! `event_time`, with the insertion id breaking ties. Traffic counters are
//! cumulative snapshots, not deltas.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of event pushed on the agent's event stream
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Snapshot sent when a subscriber connects
    #[sea_orm(string_value = "initial")]
    Initial,
    #[sea_orm(string_value = "create")]
    Create,
    #[sea_orm(string_value = "update")]
    Update,
    #[sea_orm(string_value = "delete")]
    Delete,
    /// The agent itself is going away
    #[sea_orm(string_value = "shutdown")]
    Shutdown,
    #[sea_orm(string_value = "log")]
    Log,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Initial => "initial",
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Shutdown => "shutdown",
            EventType::Log => "log",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(EventType::Initial),
            "create" => Ok(EventType::Create),
            "update" => Ok(EventType::Update),
            "delete" => Ok(EventType::Delete),
            "shutdown" => Ok(EventType::Shutdown),
            "log" => Ok(EventType::Log),
            other => Err(format!("unknown event type: {other:?}")),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "endpoint_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub endpoint_id: i32,

    pub instance_id: String,

    pub event_type: EventType,

    /// `server` / `client` as reported by the agent
    pub instance_type: Option<String>,

    pub status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub logs: Option<String>,

    pub tcp_rx: Option<i64>,
    pub tcp_tx: Option<i64>,
    pub udp_rx: Option<i64>,
    pub udp_tx: Option<i64>,

    pub event_time: ChronoDateTimeUtc,

    pub created_at: ChronoDateTimeUtc,
}

impl Model {
    /// Whether any traffic counter is present
    pub fn has_traffic(&self) -> bool {
        self.tcp_rx.is_some() || self.tcp_tx.is_some() || self.udp_rx.is_some() || self.udp_tx.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
