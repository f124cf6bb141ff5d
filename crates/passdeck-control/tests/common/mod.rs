//! Shared fixtures: an in-memory store and a scriptable fake agent

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use passdeck_agent::{
    AgentClient, AgentEndpoint, AgentError, AgentEvent, AgentEventKind, AgentEventStream,
    AgentInstance, InstanceAction,
};
use passdeck_control::{agent_endpoint, ControlConfig, TunnelOrchestrator};
use passdeck_store::entities::endpoint;
use passdeck_store::entities::tunnel::{self, TlsMode, TunnelMode, TunnelStatus};
use passdeck_store::{connect, migrate};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

type EventSender = UnboundedSender<Result<AgentEvent, AgentError>>;

struct FakeState {
    next_id: u64,
    calls: Vec<String>,
    create_rejections: Vec<(String, String)>,
    create_delays: Vec<(String, Duration)>,
    delete_rejection: Option<String>,
    confirm_deletes: bool,
    blank_instance_ids: bool,
    streams: HashMap<i32, EventSender>,
}

/// In-process agent that records calls and follows a script
pub struct FakeAgent {
    state: Mutex<FakeState>,
}

impl FakeAgent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_id: 1,
                calls: Vec::new(),
                create_rejections: Vec::new(),
                create_delays: Vec::new(),
                delete_rejection: None,
                confirm_deletes: true,
                blank_instance_ids: false,
                streams: HashMap::new(),
            }),
        })
    }

    /// Reject creates whose command line contains `needle`
    pub fn reject_create_if(&self, needle: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .create_rejections
            .push((needle.to_string(), message.to_string()));
    }

    /// Delay creates whose command line contains `needle`
    pub fn delay_create_if(&self, needle: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .create_delays
            .push((needle.to_string(), delay));
    }

    pub fn reject_deletes(&self, message: &str) {
        self.state.lock().unwrap().delete_rejection = Some(message.to_string());
    }

    /// Accept deletes but never report them on the event stream
    pub fn silent_deletes(&self) {
        self.state.lock().unwrap().confirm_deletes = false;
    }

    /// Accept creates but answer with an empty instance id
    pub fn blank_instance_ids(&self) {
        self.state.lock().unwrap().blank_instance_ids = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Push an event onto an endpoint's stream, if one is subscribed
    pub fn push(&self, endpoint_id: i32, event: AgentEvent) {
        if let Some(tx) = self.state.lock().unwrap().streams.get(&endpoint_id) {
            let _ = tx.unbounded_send(Ok(event));
        }
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn create_instance(
        &self,
        _endpoint: &AgentEndpoint,
        command_url: &str,
    ) -> Result<AgentInstance, AgentError> {
        let (rejection, delay, id) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("create {}", command_url));
            let rejection = state
                .create_rejections
                .iter()
                .find(|(needle, _)| command_url.contains(needle.as_str()))
                .map(|(_, msg)| msg.clone());
            let delay = state
                .create_delays
                .iter()
                .find(|(needle, _)| command_url.contains(needle.as_str()))
                .map(|(_, d)| *d);
            let id = if state.blank_instance_ids {
                String::new()
            } else {
                format!("inst-{}", state.next_id)
            };
            state.next_id += 1;
            (rejection, delay, id)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = rejection {
            return Err(AgentError::Rejected {
                status: 409,
                message,
            });
        }

        Ok(AgentInstance {
            id,
            status: Some("running".to_string()),
            url: Some(command_url.to_string()),
            ..Default::default()
        })
    }

    async fn control_instance(
        &self,
        _endpoint: &AgentEndpoint,
        instance_id: &str,
        action: InstanceAction,
    ) -> Result<AgentInstance, AgentError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("control {} {}", instance_id, action));
        let status = match action {
            InstanceAction::Stop => "stopped",
            _ => "running",
        };
        Ok(AgentInstance {
            id: instance_id.to_string(),
            status: Some(status.to_string()),
            ..Default::default()
        })
    }

    async fn delete_instance(
        &self,
        endpoint: &AgentEndpoint,
        instance_id: &str,
    ) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {}", instance_id));
        if let Some(message) = state.delete_rejection.clone() {
            return Err(AgentError::Rejected {
                status: 500,
                message,
            });
        }
        if state.confirm_deletes {
            if let Some(tx) = state.streams.get(&endpoint.id) {
                let _ = tx.unbounded_send(Ok(event(AgentEventKind::Delete, instance_id, None)));
            }
        }
        Ok(())
    }

    async fn events(&self, endpoint: &AgentEndpoint) -> Result<AgentEventStream, AgentError> {
        let (tx, rx) = unbounded();
        self.state.lock().unwrap().streams.insert(endpoint.id, tx);
        Ok(rx.boxed())
    }
}

pub struct Harness {
    pub db: DatabaseConnection,
    pub agent: Arc<FakeAgent>,
    pub orchestrator: TunnelOrchestrator,
    pub endpoint: endpoint::Model,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ControlConfig {
            delete_timeout_ms: 1000,
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: ControlConfig) -> Self {
        let db = connect("sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory database");
        migrate(&db).await.expect("Failed to run migrations");

        let agent = FakeAgent::new();
        let orchestrator = TunnelOrchestrator::new(db.clone(), agent.clone(), config);
        let endpoint = insert_endpoint(&db, "edge-1", "http://edge.example.com:3000").await;

        let harness = Self {
            db,
            agent,
            orchestrator,
            endpoint,
        };
        harness.follow(&harness.endpoint).await;
        harness
    }

    /// Subscribe to `endpoint` and apply its events in the background
    pub async fn follow(&self, endpoint: &endpoint::Model) {
        let stream = self
            .agent
            .events(&agent_endpoint(endpoint))
            .await
            .expect("subscribe");
        let ingestor = self.orchestrator.ingestor();
        let endpoint_id = endpoint.id;
        tokio::spawn(async move {
            ingestor.run(endpoint_id, stream).await;
        });
    }

    pub async fn add_endpoint(&self, name: &str, url: &str) -> endpoint::Model {
        let endpoint = insert_endpoint(&self.db, name, url).await;
        self.follow(&endpoint).await;
        endpoint
    }
}

pub async fn insert_endpoint(db: &DatabaseConnection, name: &str, url: &str) -> endpoint::Model {
    endpoint::ActiveModel {
        name: Set(name.to_string()),
        url: Set(url.to_string()),
        api_path: Set("/api".to_string()),
        api_key: Set("secret".to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert endpoint")
}

/// A tunnel row whose creation never produced an instance id
pub async fn insert_pending(db: &DatabaseConnection, endpoint_id: i32, name: &str) -> tunnel::Model {
    let now = Utc::now();
    tunnel::ActiveModel {
        instance_id: Set(Some(String::new())),
        name: Set(name.to_string()),
        endpoint_id: Set(endpoint_id),
        mode: Set(TunnelMode::Client),
        tunnel_address: Set(String::new()),
        tunnel_port: Set(1),
        target_address: Set("h".to_string()),
        target_port: Set(2),
        tls_mode: Set(TlsMode::Off),
        cert_path: Set(None),
        key_path: Set(None),
        log_level: Set(None),
        min_concurrency: Set(None),
        max_concurrency: Set(None),
        status: Set(TunnelStatus::Stopped),
        tcp_rx: Set(0),
        tcp_tx: Set(0),
        udp_rx: Set(0),
        udp_tx: Set(0),
        command_line: Set("client://:1/h:2".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert pending tunnel")
}

/// An agent event for `instance_id`
pub fn event(kind: AgentEventKind, instance_id: &str, time: Option<DateTime<Utc>>) -> AgentEvent {
    AgentEvent {
        kind,
        time,
        instance: Some(AgentInstance {
            id: instance_id.to_string(),
            ..Default::default()
        }),
        logs: None,
    }
}

pub fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, second).unwrap()
}
