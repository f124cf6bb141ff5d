//! Batch create and delete with bounded, order-preserving concurrency
//!
//! A batch is validated as a whole before anything runs; after that each
//! item succeeds or fails on its own and the outcome lists one result per
//! item in input order.

use std::collections::HashMap;

use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::CreateCommand;
use crate::error::{ControlError, Result};
use crate::identity::TunnelRef;
use crate::normalizer::{from_structured, PortValue, StructuredCreate};
use crate::orchestrator::TunnelOrchestrator;

/// Flat batch item; `mode` defaults to `client`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StandardBatchItem {
    pub endpoint_id: i32,
    pub name: String,
    pub tunnel_port: PortValue,
    pub target_host: String,
    pub target_port: PortValue,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl StandardBatchItem {
    pub fn to_command(&self) -> Result<CreateCommand> {
        let cmd = from_structured(&StructuredCreate {
            name: self.name.clone(),
            endpoint_id: Some(self.endpoint_id),
            mode: Some(self.mode.clone().unwrap_or_else(|| "client".to_string())),
            tunnel_port: Some(self.tunnel_port.clone()),
            target_address: Some(self.target_host.clone()),
            target_port: Some(self.target_port.clone()),
            log_level: self.log_level.clone(),
            ..Default::default()
        })?;
        cmd.validate()?;
        Ok(cmd)
    }
}

/// Several client forwards on one endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigGroup {
    pub endpoint_id: i32,
    pub configs: Vec<GroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub listen_port: PortValue,
    /// `host:port`
    pub dest: String,
}

impl GroupConfig {
    pub fn to_command(&self, endpoint_id: i32) -> Result<CreateCommand> {
        let dest = self.dest.trim();
        let (host, port) = dest
            .rsplit_once(':')
            .ok_or_else(|| ControlError::invalid(format!("dest {dest:?} must be host:port")))?;

        let cmd = from_structured(&StructuredCreate {
            name: self.name.clone(),
            endpoint_id: Some(endpoint_id),
            mode: Some("client".to_string()),
            tunnel_port: Some(self.listen_port.clone()),
            target_address: Some(host.to_string()),
            target_port: Some(PortValue::from(port)),
            ..Default::default()
        })?;
        cmd.validate()?;
        Ok(cmd)
    }
}

/// Per-item outcome; `index` is 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    /// Tunnel name for creates, the reference for deletes
    pub identifier: String,
    pub success: bool,
    pub error: Option<String>,
    pub tunnel_id: Option<i32>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// False only when every item failed
    pub success: bool,
    pub success_count: usize,
    pub fail_count: usize,
    pub results: Vec<BatchItemResult>,
}

impl BatchOutcome {
    fn from_results(results: Vec<BatchItemResult>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let fail_count = results.len() - success_count;
        Self {
            success: fail_count < results.len(),
            success_count,
            fail_count,
            results,
        }
    }
}

#[derive(Clone)]
pub struct BatchExecutor {
    orchestrator: TunnelOrchestrator,
}

impl BatchExecutor {
    pub fn new(orchestrator: TunnelOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn create_standard(&self, items: &[StandardBatchItem]) -> Result<BatchOutcome> {
        self.check_size(items.len())?;

        let mut names = NameClaims::default();
        let commands = items
            .iter()
            .enumerate()
            .map(|(i, item)| -> Result<CreateCommand> {
                let label = format!("item {}", i + 1);
                let cmd = item
                    .to_command()
                    .map_err(|e| ControlError::invalid(format!("{}: {}", label, reason(e))))?;
                names.claim(&cmd.name, label)?;
                Ok(cmd)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.run_creates(commands).await)
    }

    pub async fn create_config_groups(&self, groups: &[ConfigGroup]) -> Result<BatchOutcome> {
        let total = groups.iter().map(|g| g.configs.len()).sum();
        self.check_size(total)?;

        let mut commands = Vec::with_capacity(total);
        let mut names = NameClaims::default();
        for (g, group) in groups.iter().enumerate() {
            if group.configs.is_empty() {
                return Err(ControlError::invalid(format!(
                    "group {}: config list is empty",
                    g + 1
                )));
            }
            for (j, config) in group.configs.iter().enumerate() {
                let label = format!("group {} item {}", g + 1, j + 1);
                let cmd = config
                    .to_command(group.endpoint_id)
                    .map_err(|e| ControlError::invalid(format!("{}: {}", label, reason(e))))?;
                names.claim(&cmd.name, label)?;
                commands.push(cmd);
            }
        }

        Ok(self.run_creates(commands).await)
    }

    /// Delete each referenced tunnel and wait for its confirmation
    ///
    /// References are resolved up front. One that does not resolve, or that
    /// names a tunnel an earlier item already targets, becomes a failed item.
    pub async fn delete(&self, targets: &[TunnelRef], recycle: bool) -> Result<BatchOutcome> {
        self.check_size(targets.len())?;
        let timeout = self.orchestrator.config().delete_timeout();

        let mut claimed: HashMap<i32, usize> = HashMap::new();
        let mut plan = Vec::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            let resolved = match self.orchestrator.resolver().resolve_target(target).await {
                Ok(row) => match claimed.get(&row.id).copied() {
                    Some(first) => Err(ControlError::invalid(format!(
                        "duplicate of item {} (tunnel {})",
                        first, row.id
                    ))),
                    None => {
                        claimed.insert(row.id, i + 1);
                        Ok(row)
                    }
                },
                Err(e) => Err(e),
            };
            plan.push((i + 1, target.to_string(), resolved));
        }

        let results = stream::iter(plan.into_iter().map(|(index, identifier, resolved)| {
            let orchestrator = self.orchestrator.clone();
            async move {
                let row = match resolved {
                    Ok(row) => row,
                    Err(e) => {
                        let e = orchestrator
                            .audit()
                            .outcome::<()>("delete", &identifier, None, Err(e))
                            .await
                            .err();
                        return failed(index, identifier, e);
                    }
                };

                let instance_id = row.instance().unwrap_or_default().to_string();
                let result = orchestrator
                    .delete_tunnel_and_wait(&instance_id, timeout, recycle)
                    .await;
                BatchItemResult {
                    index,
                    identifier,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                    tunnel_id: Some(row.id),
                    instance_id: Some(instance_id).filter(|id| !id.is_empty()),
                }
            }
        }))
        .buffered(self.workers())
        .collect::<Vec<_>>()
        .await;

        let outcome = BatchOutcome::from_results(results);
        info!(
            "Batch delete finished: {} succeeded, {} failed",
            outcome.success_count, outcome.fail_count
        );
        Ok(outcome)
    }

    async fn run_creates(&self, commands: Vec<CreateCommand>) -> BatchOutcome {
        let results = stream::iter(commands.into_iter().enumerate().map(|(i, cmd)| {
            let orchestrator = self.orchestrator.clone();
            async move {
                let identifier = cmd.name.trim().to_string();
                match orchestrator.create_tunnel(&cmd).await {
                    Ok(row) => BatchItemResult {
                        index: i + 1,
                        identifier,
                        success: true,
                        error: None,
                        tunnel_id: Some(row.id),
                        instance_id: row.instance_id,
                    },
                    Err(e) => failed(i + 1, identifier, Some(e)),
                }
            }
        }))
        .buffered(self.workers())
        .collect::<Vec<_>>()
        .await;

        let outcome = BatchOutcome::from_results(results);
        info!(
            "Batch create finished: {} succeeded, {} failed",
            outcome.success_count, outcome.fail_count
        );
        outcome
    }

    fn check_size(&self, len: usize) -> Result<()> {
        let max = self.orchestrator.config().max_batch_size;
        if len == 0 {
            return Err(ControlError::invalid("batch is empty"));
        }
        if len > max {
            return Err(ControlError::invalid(format!(
                "batch has {len} items; the limit is {max}"
            )));
        }
        Ok(())
    }

    fn workers(&self) -> usize {
        self.orchestrator.config().batch_workers.max(1)
    }
}

/// Tunnel names already used earlier in the same batch
#[derive(Default)]
struct NameClaims {
    seen: HashMap<String, String>,
}

impl NameClaims {
    fn claim(&mut self, name: &str, label: String) -> Result<()> {
        let name = name.trim();
        if let Some(first) = self.seen.get(name) {
            return Err(ControlError::invalid(format!(
                "{}: duplicate name {:?} (already used by {})",
                label, name, first
            )));
        }
        self.seen.insert(name.to_string(), label);
        Ok(())
    }
}

fn failed(index: usize, identifier: String, err: Option<ControlError>) -> BatchItemResult {
    BatchItemResult {
        index,
        identifier,
        success: false,
        error: err.map(|e| e.to_string()),
        tunnel_id: None,
        instance_id: None,
    }
}

fn reason(err: ControlError) -> String {
    match err {
        ControlError::InvalidArgument(msg) => msg,
        other => other.to_string(),
    }
}
