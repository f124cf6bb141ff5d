//! Tunnel lifecycle: list, create, control, delete-and-wait, rename, edit
//!
//! The orchestrator keeps the local `tunnels` table in step with what each
//! agent reports. Agent calls are never retried; every operation leaves one
//! audit entry whatever its outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use passdeck_agent::{AgentClient, AgentEndpoint, InstanceAction};
use passdeck_store::entities::tunnel::TunnelStatus;
use passdeck_store::entities::{endpoint, tunnel, tunnel_recycle, Endpoint, Tunnel};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::command::CreateCommand;
use crate::config::ControlConfig;
use crate::confirmation::{ConfirmationHub, WaitOutcome};
use crate::error::{ControlError, PairStep, ReplacePhase, Result};
use crate::identity::{IdentityResolver, TunnelRef};
use crate::ingest::EventIngestor;
use crate::normalizer::{
    from_structured, normalize, parse_quick, CreateRequest, NormalizeContext, NormalizedCreate,
    StructuredCreate,
};

/// Rows produced by a create request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreatedTunnels {
    Single(tunnel::Model),
    Pair {
        server: tunnel::Model,
        client: tunnel::Model,
    },
}

impl CreatedTunnels {
    pub fn tunnels(&self) -> Vec<&tunnel::Model> {
        match self {
            CreatedTunnels::Single(t) => vec![t],
            CreatedTunnels::Pair { server, client } => vec![server, client],
        }
    }
}

#[derive(Clone)]
pub struct TunnelOrchestrator {
    db: DatabaseConnection,
    agent: Arc<dyn AgentClient>,
    hub: ConfirmationHub,
    config: ControlConfig,
    resolver: IdentityResolver,
    audit: AuditLog,
}

impl TunnelOrchestrator {
    pub fn new(db: DatabaseConnection, agent: Arc<dyn AgentClient>, config: ControlConfig) -> Self {
        Self {
            resolver: IdentityResolver::new(db.clone()),
            audit: AuditLog::new(db.clone()),
            hub: ConfirmationHub::new(),
            db,
            agent,
            config,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn agent(&self) -> Arc<dyn AgentClient> {
        self.agent.clone()
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn hub(&self) -> &ConfirmationHub {
        &self.hub
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Event ingestor sharing this orchestrator's confirmation hub
    pub fn ingestor(&self) -> EventIngestor {
        EventIngestor::new(self.db.clone(), self.hub.clone())
    }

    /// Tunnels ordered by id with their last mirrored status and counters
    ///
    /// `endpoint_id` narrows the listing to one agent.
    pub async fn list_tunnels(&self, endpoint_id: Option<i32>) -> Result<Vec<tunnel::Model>> {
        let mut query = Tunnel::find().order_by_asc(tunnel::Column::Id);
        if let Some(endpoint_id) = endpoint_id {
            query = query.filter(tunnel::Column::EndpointId.eq(endpoint_id));
        }
        Ok(query.all(&self.db).await?)
    }

    /// Create one tunnel on its endpoint's agent and persist it
    pub async fn create_tunnel(&self, cmd: &CreateCommand) -> Result<tunnel::Model> {
        let result = self.try_create(cmd).await;
        let tunnel_id = result.as_ref().ok().map(|t| t.id);
        self.audit
            .outcome("create", cmd.name.trim(), tunnel_id, result)
            .await
    }

    async fn try_create(&self, cmd: &CreateCommand) -> Result<tunnel::Model> {
        cmd.validate()?;
        let endpoint = self.load_endpoint(cmd.endpoint_id).await?;
        let name = cmd.name.trim();

        let taken = Tunnel::find()
            .filter(tunnel::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .is_some();
        if taken {
            return Err(ControlError::invalid(format!(
                "tunnel name {:?} is already in use",
                name
            )));
        }

        let command_line = cmd.command_line();
        debug!("Creating tunnel {} on endpoint {}: {}", name, endpoint.id, command_line);

        let instance = self
            .agent
            .create_instance(&agent_endpoint(&endpoint), &command_line)
            .await
            .map_err(|e| {
                warn!("Agent rejected tunnel {} on endpoint {}: {}", name, endpoint.id, e);
                ControlError::from(e)
            })?;
        if instance.id.trim().is_empty() {
            warn!("Agent accepted tunnel {} on endpoint {} without an instance id", name, endpoint.id);
            return Err(ControlError::RemoteFailure(format!(
                "agent returned no instance id for tunnel {}",
                name
            )));
        }

        let status = instance
            .status
            .as_deref()
            .and_then(TunnelStatus::from_agent)
            .unwrap_or(TunnelStatus::Stopped);
        let now = Utc::now();

        let row = tunnel::ActiveModel {
            instance_id: Set(Some(instance.id.clone())),
            name: Set(name.to_string()),
            endpoint_id: Set(cmd.endpoint_id),
            mode: Set(cmd.mode),
            tunnel_address: Set(cmd.tunnel_address.clone()),
            tunnel_port: Set(i32::from(cmd.tunnel_port)),
            target_address: Set(cmd.target_address.clone()),
            target_port: Set(i32::from(cmd.target_port)),
            tls_mode: Set(cmd.tls_mode),
            cert_path: Set(cmd.cert_path.clone()),
            key_path: Set(cmd.key_path.clone()),
            log_level: Set(cmd.log_level),
            min_concurrency: Set(cmd.min_concurrency),
            max_concurrency: Set(cmd.max_concurrency),
            status: Set(status),
            tcp_rx: Set(instance.tcp_rx.unwrap_or(0)),
            tcp_tx: Set(instance.tcp_tx.unwrap_or(0)),
            udp_rx: Set(instance.udp_rx.unwrap_or(0)),
            udp_tx: Set(instance.udp_tx.unwrap_or(0)),
            command_line: Set(command_line),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let row = match row.insert(&self.db).await {
            Ok(row) => row,
            Err(e) => {
                error!(
                    "Instance {} was created on endpoint {} but could not be stored: {}",
                    instance.id, endpoint.id, e
                );
                self.discard_instance(&endpoint, &instance.id).await;
                return Err(match e.sql_err() {
                    Some(SqlErr::UniqueConstraintViolation(_)) => ControlError::invalid(format!(
                        "tunnel name {:?} is already in use",
                        name
                    )),
                    _ => ControlError::from(e),
                });
            }
        };

        info!(
            tunnel_id = row.id,
            instance_id = %instance.id,
            "Created tunnel {}",
            row.name
        );
        Ok(row)
    }

    /// Remove an instance the store could not record
    async fn discard_instance(&self, endpoint: &endpoint::Model, instance_id: &str) {
        match self
            .agent
            .delete_instance(&agent_endpoint(endpoint), instance_id)
            .await
        {
            Ok(()) => info!("Removed unrecorded instance {} from endpoint {}", instance_id, endpoint.id),
            Err(e) => error!(
                "Instance {} on endpoint {} is not recorded locally and could not be removed: {}",
                instance_id, endpoint.id, e
            ),
        }
    }

    /// Parse a quick URL for `endpoint_id` and create it
    pub async fn quick_create(
        &self,
        endpoint_id: i32,
        name: &str,
        url: &str,
    ) -> Result<tunnel::Model> {
        match parse_quick(endpoint_id, name, url) {
            Ok(cmd) => self.create_tunnel(&cmd).await,
            Err(e) => self.audit.outcome("create", name.trim(), None, Err(e)).await,
        }
    }

    /// Normalize any request shape and create what it describes
    ///
    /// For a pair the server is created first. A client failure leaves the
    /// server tunnel in place.
    pub async fn create_from_request(&self, request: &CreateRequest) -> Result<CreatedTunnels> {
        let normalized = match self.normalize_request(request).await {
            Ok(n) => n,
            Err(e) => {
                return self
                    .audit
                    .outcome("create", request_label(request), None, Err(e))
                    .await
            }
        };

        match normalized {
            NormalizedCreate::Single(cmd) => self.create_tunnel(&cmd).await.map(CreatedTunnels::Single),
            NormalizedCreate::Pair { server, client } => {
                let server = self
                    .create_tunnel(&server)
                    .await
                    .map_err(|e| e.in_step(PairStep::Server))?;
                let client = self.create_tunnel(&client).await.map_err(|e| {
                    warn!(
                        "Client half of pair failed; server tunnel {} is left in place",
                        server.name
                    );
                    e.in_step(PairStep::Client)
                })?;
                Ok(CreatedTunnels::Pair { server, client })
            }
        }
    }

    async fn normalize_request(&self, request: &CreateRequest) -> Result<NormalizedCreate> {
        let mut ctx = NormalizeContext {
            server_base_url: None,
            timestamp: Utc::now().timestamp(),
        };
        if let CreateRequest::Template(t) = request {
            if let Some(endpoint_id) = t.server_endpoint_id() {
                ctx.server_base_url = Some(self.load_endpoint(endpoint_id).await?.url);
            }
        }
        normalize(request, &ctx)
    }

    /// Start, stop or restart a tunnel; mirrors the status the agent reports
    pub async fn control_tunnel(&self, target: &TunnelRef, action: &str) -> Result<tunnel::Model> {
        let label = action.trim().to_ascii_lowercase();
        let row = match self.resolver.resolve_target(target).await {
            Ok(row) => row,
            Err(e) => {
                return self
                    .audit
                    .outcome(&label, &target.to_string(), None, Err(e))
                    .await
            }
        };

        let result = self.try_control(&row, action).await;
        self.audit.outcome(&label, &row.name, Some(row.id), result).await
    }

    async fn try_control(&self, row: &tunnel::Model, action: &str) -> Result<tunnel::Model> {
        let action = action
            .parse::<InstanceAction>()
            .map_err(ControlError::InvalidArgument)?;
        let instance_id = row
            .instance()
            .ok_or_else(|| ControlError::not_found(format!("tunnel {} has no instance id", row.id)))?;
        let endpoint = self.load_endpoint(row.endpoint_id).await?;

        let instance = self
            .agent
            .control_instance(&agent_endpoint(&endpoint), instance_id, action)
            .await?;
        info!(tunnel_id = row.id, "Sent {} to instance {}", action, instance_id);

        match instance.status.as_deref().and_then(TunnelStatus::from_agent) {
            Some(status) if status != row.status => {
                let mut active: tunnel::ActiveModel = row.clone().into();
                active.status = Set(status);
                active.updated_at = Set(Utc::now());
                Ok(active.update(&self.db).await?)
            }
            _ => Ok(row.clone()),
        }
    }

    /// Delete an instance and wait for the agent to confirm it is gone
    ///
    /// The local row is finalized (archived when `recycle` is set, purged
    /// otherwise) whether or not confirmation arrives; an expired wait
    /// still returns [`ControlError::Timeout`].
    pub async fn delete_tunnel_and_wait(
        &self,
        instance_id: &str,
        timeout: Duration,
        recycle: bool,
    ) -> Result<()> {
        let target = TunnelRef::Instance(instance_id.to_string());
        let snapshot = match self.resolver.resolve_target(&target).await {
            Ok(row) => row,
            Err(e) => return self.audit.outcome("delete", instance_id, None, Err(e)).await,
        };

        let result = self.try_delete(&snapshot, timeout, recycle).await;
        self.audit
            .outcome("delete", &snapshot.name, Some(snapshot.id), result)
            .await
    }

    async fn try_delete(&self, snapshot: &tunnel::Model, timeout: Duration, recycle: bool) -> Result<()> {
        let instance_id = snapshot
            .instance()
            .ok_or_else(|| ControlError::not_found(format!("tunnel {} has no instance id", snapshot.id)))?;
        let endpoint = self.load_endpoint(snapshot.endpoint_id).await?;

        // Registered before the request so an early confirmation is kept
        let waiter = self.hub.register(snapshot.endpoint_id, instance_id);

        if let Err(e) = self
            .agent
            .delete_instance(&agent_endpoint(&endpoint), instance_id)
            .await
        {
            drop(waiter);
            warn!("Agent refused to delete instance {}: {}", instance_id, e);
            return Err(e.into());
        }

        match waiter.wait(timeout).await {
            WaitOutcome::Confirmed => {
                self.finalize_delete(snapshot, recycle).await?;
                info!(tunnel_id = snapshot.id, "Deleted instance {}", instance_id);
                Ok(())
            }
            WaitOutcome::Expired => {
                self.finalize_delete(snapshot, recycle).await?;
                warn!(
                    tunnel_id = snapshot.id,
                    "Deletion of instance {} not confirmed within {:?}", instance_id, timeout
                );
                Err(ControlError::Timeout {
                    instance_id: instance_id.to_string(),
                    waited: timeout,
                })
            }
            // the newer request finalizes the row
            WaitOutcome::Superseded => {
                warn!(
                    tunnel_id = snapshot.id,
                    "Delete of instance {} superseded by a newer request", instance_id
                );
                Err(ControlError::Superseded {
                    instance_id: instance_id.to_string(),
                })
            }
        }
    }

    async fn finalize_delete(&self, snapshot: &tunnel::Model, recycle: bool) -> Result<()> {
        let txn = self.db.begin().await?;
        if recycle {
            recycle_entry(snapshot).insert(&txn).await?;
        }
        Tunnel::delete_by_id(snapshot.id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Change a tunnel's display name; the agent is not involved
    pub async fn rename_tunnel(&self, tunnel_id: i32, name: &str) -> Result<tunnel::Model> {
        let result = self.try_rename(tunnel_id, name).await;
        self.audit
            .outcome("rename", name.trim(), Some(tunnel_id), result)
            .await
    }

    async fn try_rename(&self, tunnel_id: i32, name: &str) -> Result<tunnel::Model> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::invalid("tunnel name must not be empty"));
        }

        let row = self.resolver.resolve_target(&TunnelRef::Local(tunnel_id)).await?;
        if row.name == name {
            return Ok(row);
        }
        self.ensure_name_free(name, Some(tunnel_id)).await?;

        let old_name = row.name.clone();
        let mut active: tunnel::ActiveModel = row.into();
        active.name = Set(name.to_string());
        active.updated_at = Set(Utc::now());
        let row = active.update(&self.db).await?;

        info!(tunnel_id, "Renamed tunnel {} to {}", old_name, row.name);
        Ok(row)
    }

    /// Replace a tunnel: delete the old instance (recycled), then create
    ///
    /// Only a full creation payload is accepted. There is no rollback; a
    /// create-phase failure leaves the old tunnel deleted.
    pub async fn edit_tunnel(
        &self,
        tunnel_id: i32,
        request: &StructuredCreate,
    ) -> Result<tunnel::Model> {
        let result = self.try_edit(tunnel_id, request).await;
        let (name, id) = match &result {
            Ok(row) => (row.name.clone(), Some(row.id)),
            Err(_) => (request.name.trim().to_string(), Some(tunnel_id)),
        };
        self.audit.outcome("edit", &name, id, result).await
    }

    async fn try_edit(&self, tunnel_id: i32, request: &StructuredCreate) -> Result<tunnel::Model> {
        let (old_instance, cmd) = self
            .prepare_edit(tunnel_id, request)
            .await
            .map_err(|e| e.in_phase(ReplacePhase::Resolve))?;

        self.delete_tunnel_and_wait(&old_instance, self.config.delete_timeout(), true)
            .await
            .map_err(|e| e.in_phase(ReplacePhase::Delete))?;

        self.create_tunnel(&cmd)
            .await
            .map_err(|e| e.in_phase(ReplacePhase::Create))
    }

    async fn prepare_edit(
        &self,
        tunnel_id: i32,
        request: &StructuredCreate,
    ) -> Result<(String, CreateCommand)> {
        if !request.is_full_payload() {
            return Err(ControlError::invalid(
                "unsupported update: endpoint_id and mode are required",
            ));
        }

        let old = self.resolver.resolve_target(&TunnelRef::Local(tunnel_id)).await?;
        let old_instance = old
            .instance()
            .ok_or_else(|| ControlError::not_found(format!("tunnel {} has no instance id", tunnel_id)))?
            .to_string();

        let mut request = request.clone();
        if request.name.trim().is_empty() {
            request.name = old.name.clone();
        }
        let cmd = from_structured(&request)?;
        cmd.validate()?;
        self.load_endpoint(cmd.endpoint_id).await?;
        if cmd.name.trim() != old.name {
            self.ensure_name_free(cmd.name.trim(), Some(tunnel_id)).await?;
        }

        Ok((old_instance, cmd))
    }

    async fn ensure_name_free(&self, name: &str, except: Option<i32>) -> Result<()> {
        let existing = Tunnel::find()
            .filter(tunnel::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        match existing {
            Some(row) if Some(row.id) != except => Err(ControlError::invalid(format!(
                "tunnel name {:?} is already in use",
                name
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) async fn load_endpoint(&self, endpoint_id: i32) -> Result<endpoint::Model> {
        Endpoint::find_by_id(endpoint_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("endpoint {}", endpoint_id)))
    }
}

/// Agent connection details for a stored endpoint
pub fn agent_endpoint(endpoint: &endpoint::Model) -> AgentEndpoint {
    AgentEndpoint {
        id: endpoint.id,
        base_url: endpoint.url.clone(),
        api_path: endpoint.api_path.clone(),
        api_key: endpoint.api_key.clone(),
    }
}

fn recycle_entry(t: &tunnel::Model) -> tunnel_recycle::ActiveModel {
    tunnel_recycle::ActiveModel {
        original_id: Set(t.id),
        instance_id: Set(t.instance_id.clone()),
        name: Set(t.name.clone()),
        endpoint_id: Set(t.endpoint_id),
        mode: Set(t.mode),
        tunnel_address: Set(t.tunnel_address.clone()),
        tunnel_port: Set(t.tunnel_port),
        target_address: Set(t.target_address.clone()),
        target_port: Set(t.target_port),
        tls_mode: Set(t.tls_mode),
        cert_path: Set(t.cert_path.clone()),
        key_path: Set(t.key_path.clone()),
        log_level: Set(t.log_level),
        min_concurrency: Set(t.min_concurrency),
        max_concurrency: Set(t.max_concurrency),
        command_line: Set(t.command_line.clone()),
        tcp_rx: Set(t.tcp_rx),
        tcp_tx: Set(t.tcp_tx),
        udp_rx: Set(t.udp_rx),
        udp_tx: Set(t.udp_tx),
        created_at: Set(t.created_at),
        deleted_at: Set(Utc::now()),
        ..Default::default()
    }
}

fn request_label(request: &CreateRequest) -> &str {
    match request {
        CreateRequest::Structured(s) => s.name.trim(),
        CreateRequest::Quick(q) => q.name.trim(),
        CreateRequest::Template(_) => "template",
    }
}
