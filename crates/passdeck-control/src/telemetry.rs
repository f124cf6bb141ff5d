//! Read side of the agent telemetry history

use chrono::{DateTime, Utc};
use passdeck_store::entities::endpoint_event::{self, EventType};
use passdeck_store::entities::{tunnel, Endpoint, EndpointEvent, Tunnel};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;

use crate::config::ControlConfig;
use crate::error::{ControlError, Result};

/// One raw log line as pushed by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub time: DateTime<Utc>,
    pub text: String,
}

/// Cumulative traffic counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficSample {
    pub time: DateTime<Utc>,
    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,
}

impl From<endpoint_event::Model> for TrafficSample {
    fn from(e: endpoint_event::Model) -> Self {
        Self {
            time: e.event_time,
            tcp_rx: e.tcp_rx.unwrap_or(0),
            tcp_tx: e.tcp_tx.unwrap_or(0),
            udp_rx: e.udp_rx.unwrap_or(0),
            udp_tx: e.udp_tx.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelDetails {
    pub tunnel: tunnel::Model,
    /// `None` when the endpoint registration is gone
    pub endpoint_name: Option<String>,
    pub logs: Vec<LogLine>,
    pub trend: Vec<TrafficSample>,
}

#[derive(Clone)]
pub struct TelemetryReader {
    db: DatabaseConnection,
    config: ControlConfig,
}

impl TelemetryReader {
    pub fn new(db: DatabaseConnection, config: ControlConfig) -> Self {
        Self { db, config }
    }

    /// Newest log lines first, at most `min(limit, log_window)`
    pub async fn recent_logs(&self, tunnel_id: i32, limit: usize) -> Result<Vec<LogLine>> {
        let row = self.load(tunnel_id).await?;
        self.logs_for(&row, limit).await
    }

    /// Latest `trend_window` counter samples, oldest first
    pub async fn traffic_trend(&self, tunnel_id: i32) -> Result<Vec<TrafficSample>> {
        let row = self.load(tunnel_id).await?;
        self.trend_for(&row).await
    }

    pub async fn details(&self, tunnel_id: i32) -> Result<TunnelDetails> {
        let row = self.load(tunnel_id).await?;
        let endpoint_name = Endpoint::find_by_id(row.endpoint_id)
            .one(&self.db)
            .await?
            .map(|e| e.name);
        let logs = self.logs_for(&row, self.config.log_window).await?;
        let trend = self.trend_for(&row).await?;

        Ok(TunnelDetails {
            tunnel: row,
            endpoint_name,
            logs,
            trend,
        })
    }

    async fn logs_for(&self, row: &tunnel::Model, limit: usize) -> Result<Vec<LogLine>> {
        let Some(instance_id) = row.instance() else {
            return Ok(Vec::new());
        };
        let limit = limit.min(self.config.log_window) as u64;

        let events = EndpointEvent::find()
            .filter(endpoint_event::Column::EndpointId.eq(row.endpoint_id))
            .filter(endpoint_event::Column::InstanceId.eq(instance_id))
            .filter(endpoint_event::Column::EventType.eq(EventType::Log))
            .filter(endpoint_event::Column::Logs.is_not_null())
            .order_by_desc(endpoint_event::Column::EventTime)
            .order_by_desc(endpoint_event::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(events
            .into_iter()
            .filter_map(|e| {
                e.logs.map(|text| LogLine {
                    time: e.event_time,
                    text,
                })
            })
            .collect())
    }

    async fn trend_for(&self, row: &tunnel::Model) -> Result<Vec<TrafficSample>> {
        let Some(instance_id) = row.instance() else {
            return Ok(Vec::new());
        };

        let has_counter = Condition::any()
            .add(endpoint_event::Column::TcpRx.is_not_null())
            .add(endpoint_event::Column::TcpTx.is_not_null())
            .add(endpoint_event::Column::UdpRx.is_not_null())
            .add(endpoint_event::Column::UdpTx.is_not_null());

        let mut samples: Vec<TrafficSample> = EndpointEvent::find()
            .filter(endpoint_event::Column::EndpointId.eq(row.endpoint_id))
            .filter(endpoint_event::Column::InstanceId.eq(instance_id))
            .filter(endpoint_event::Column::EventType.is_in([EventType::Initial, EventType::Update]))
            .filter(has_counter)
            .order_by_desc(endpoint_event::Column::EventTime)
            .order_by_desc(endpoint_event::Column::Id)
            .limit(self.config.trend_window as u64)
            .all(&self.db)
            .await?
            .into_iter()
            .map(TrafficSample::from)
            .collect();

        samples.reverse();
        Ok(samples)
    }

    async fn load(&self, tunnel_id: i32) -> Result<tunnel::Model> {
        Tunnel::find_by_id(tunnel_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("tunnel {}", tunnel_id)))
    }
}
