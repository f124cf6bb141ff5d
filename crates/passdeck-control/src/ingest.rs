//! Agent event ingestion
//!
//! Appends every instance event to `endpoint_events`, mirrors status and
//! counters onto the matching tunnel row, and turns `delete` events into
//! confirmations for waiting deletes.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use passdeck_agent::{AgentClient, AgentEndpoint, AgentEvent, AgentEventKind, AgentEventStream, AgentInstance};
use passdeck_store::entities::endpoint_event::{self, EventType};
use passdeck_store::entities::tunnel::{self, TunnelStatus};
use passdeck_store::entities::Tunnel;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{debug, info, warn};

use crate::confirmation::ConfirmationHub;
use crate::error::Result;

#[derive(Clone)]
pub struct EventIngestor {
    db: DatabaseConnection,
    hub: ConfirmationHub,
}

impl EventIngestor {
    pub fn new(db: DatabaseConnection, hub: ConfirmationHub) -> Self {
        Self { db, hub }
    }

    /// Apply one event received from `endpoint_id`
    pub async fn apply(&self, endpoint_id: i32, event: &AgentEvent) -> Result<()> {
        let Some(kind) = event_type(event.kind) else {
            debug!("Ignoring unknown event from endpoint {}", endpoint_id);
            return Ok(());
        };

        if kind == EventType::Shutdown {
            return self.mark_endpoint_stopped(endpoint_id).await;
        }

        let (Some(instance_id), Some(instance)) = (event.instance_id(), event.instance.as_ref())
        else {
            debug!("Dropping {} event without an instance id", kind);
            return Ok(());
        };

        self.append(endpoint_id, instance_id, kind, event, instance)
            .await?;

        match kind {
            EventType::Initial | EventType::Create | EventType::Update => {
                self.mirror(endpoint_id, instance_id, instance).await
            }
            EventType::Delete => {
                if !self.hub.confirm(endpoint_id, instance_id) {
                    self.purge(endpoint_id, instance_id).await?;
                }
                Ok(())
            }
            EventType::Log | EventType::Shutdown => Ok(()),
        }
    }

    /// Apply events until the stream ends; returns how many were applied
    pub async fn run(&self, endpoint_id: i32, mut stream: AgentEventStream) -> u64 {
        let mut applied = 0;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => match self.apply(endpoint_id, &event).await {
                    Ok(()) => applied += 1,
                    Err(e) => warn!("Failed to apply event from endpoint {}: {}", endpoint_id, e),
                },
                Err(e) => warn!("Bad event from endpoint {}: {}", endpoint_id, e),
            }
        }
        info!("Event stream for endpoint {} ended after {} events", endpoint_id, applied);
        applied
    }

    /// Subscribe to an agent's event stream and apply it until it ends
    pub async fn follow(&self, agent: Arc<dyn AgentClient>, endpoint: &AgentEndpoint) -> Result<u64> {
        let stream = agent.events(endpoint).await?;
        info!("Following events of endpoint {}", endpoint.id);
        Ok(self.run(endpoint.id, stream).await)
    }

    async fn append(
        &self,
        endpoint_id: i32,
        instance_id: &str,
        kind: EventType,
        event: &AgentEvent,
        instance: &AgentInstance,
    ) -> Result<()> {
        let now = Utc::now();
        endpoint_event::ActiveModel {
            endpoint_id: Set(endpoint_id),
            instance_id: Set(instance_id.to_string()),
            event_type: Set(kind),
            instance_type: Set(instance.instance_type.clone()),
            status: Set(instance.status.clone()),
            logs: Set(event.logs.clone()),
            tcp_rx: Set(instance.tcp_rx),
            tcp_tx: Set(instance.tcp_tx),
            udp_rx: Set(instance.udp_rx),
            udp_tx: Set(instance.udp_tx),
            event_time: Set(event.time.unwrap_or(now)),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    async fn mirror(&self, endpoint_id: i32, instance_id: &str, instance: &AgentInstance) -> Result<()> {
        let Some(row) = self.find(endpoint_id, instance_id).await? else {
            return Ok(());
        };

        let status = instance.status.as_deref().and_then(TunnelStatus::from_agent);
        let mut active: tunnel::ActiveModel = row.into();
        if let Some(status) = status {
            active.status = Set(status);
        }
        if let Some(v) = instance.tcp_rx {
            active.tcp_rx = Set(v);
        }
        if let Some(v) = instance.tcp_tx {
            active.tcp_tx = Set(v);
        }
        if let Some(v) = instance.udp_rx {
            active.udp_rx = Set(v);
        }
        if let Some(v) = instance.udp_tx {
            active.udp_tx = Set(v);
        }

        if active.is_changed() {
            active.updated_at = Set(Utc::now());
            active.update(&self.db).await?;
        }
        Ok(())
    }

    /// Remove a row whose instance was deleted out of band
    async fn purge(&self, endpoint_id: i32, instance_id: &str) -> Result<()> {
        if let Some(row) = self.find(endpoint_id, instance_id).await? {
            Tunnel::delete_by_id(row.id).exec(&self.db).await?;
            info!(tunnel_id = row.id, "Instance {} removed on the agent; dropped tunnel {}", instance_id, row.name);
        }
        Ok(())
    }

    async fn mark_endpoint_stopped(&self, endpoint_id: i32) -> Result<()> {
        let result = Tunnel::update_many()
            .set(tunnel::ActiveModel {
                status: Set(TunnelStatus::Stopped),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .exec(&self.db)
            .await?;
        info!(
            "Endpoint {} shut down; {} tunnels marked stopped",
            endpoint_id, result.rows_affected
        );
        Ok(())
    }

    async fn find(&self, endpoint_id: i32, instance_id: &str) -> Result<Option<tunnel::Model>> {
        Ok(Tunnel::find()
            .filter(tunnel::Column::EndpointId.eq(endpoint_id))
            .filter(tunnel::Column::InstanceId.eq(instance_id))
            .one(&self.db)
            .await?)
    }
}

fn event_type(kind: AgentEventKind) -> Option<EventType> {
    match kind {
        AgentEventKind::Initial => Some(EventType::Initial),
        AgentEventKind::Create => Some(EventType::Create),
        AgentEventKind::Update => Some(EventType::Update),
        AgentEventKind::Delete => Some(EventType::Delete),
        AgentEventKind::Shutdown => Some(EventType::Shutdown),
        AgentEventKind::Log => Some(EventType::Log),
        AgentEventKind::Unknown => None,
    }
}
