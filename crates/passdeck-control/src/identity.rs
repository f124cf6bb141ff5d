//! Mapping between local tunnel ids and agent instance ids

use std::fmt;

use passdeck_store::entities::{tunnel, Tunnel};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// A tunnel addressed by either of its identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelRef {
    /// Control-plane row id
    Local(i32),
    /// Agent-assigned instance id
    Instance(String),
}

impl fmt::Display for TunnelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelRef::Local(id) => write!(f, "tunnel {}", id),
            TunnelRef::Instance(id) => write!(f, "instance {}", id),
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    db: DatabaseConnection,
}

impl IdentityResolver {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Instance id of a local tunnel
    ///
    /// Fails with `NotFound` both for an unknown id and for a row whose
    /// creation never produced an instance id.
    pub async fn resolve_instance_id(&self, tunnel_id: i32) -> Result<String> {
        let row = self.load(tunnel_id).await?;
        row.instance()
            .map(str::to_string)
            .ok_or_else(|| ControlError::not_found(format!("tunnel {} has no instance id", tunnel_id)))
    }

    pub async fn resolve_tunnel_id(&self, instance_id: &str) -> Result<i32> {
        self.find_by_instance(instance_id).await.map(|row| row.id)
    }

    /// Load the row behind either kind of reference
    pub async fn resolve_target(&self, target: &TunnelRef) -> Result<tunnel::Model> {
        match target {
            TunnelRef::Local(id) => self.load(*id).await,
            TunnelRef::Instance(instance_id) => self.find_by_instance(instance_id).await,
        }
    }

    async fn load(&self, tunnel_id: i32) -> Result<tunnel::Model> {
        Tunnel::find_by_id(tunnel_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("tunnel {}", tunnel_id)))
    }

    async fn find_by_instance(&self, instance_id: &str) -> Result<tunnel::Model> {
        let instance_id = instance_id.trim();
        if instance_id.is_empty() {
            return Err(ControlError::not_found("empty instance id"));
        }
        Tunnel::find()
            .filter(tunnel::Column::InstanceId.eq(instance_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("instance {}", instance_id)))
    }
}
