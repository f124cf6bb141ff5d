//! Operation audit trail

use chrono::Utc;
use passdeck_store::entities::{operation_log, OperationLog};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use tracing::warn;

pub use passdeck_store::entities::operation_log::OperationStatus;

use crate::error::{ControlError, ErrorKind, Result};

#[derive(Clone)]
pub struct AuditLog {
    db: DatabaseConnection,
}

impl AuditLog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append one entry. A failed write is logged and swallowed so it never
    /// replaces the outcome of the operation being audited.
    pub async fn record(
        &self,
        action: &str,
        tunnel_name: &str,
        tunnel_id: Option<i32>,
        status: OperationStatus,
        message: Option<String>,
    ) {
        let entry = operation_log::ActiveModel {
            tunnel_id: Set(tunnel_id),
            tunnel_name: Set(tunnel_name.to_string()),
            action: Set(action.to_string()),
            status: Set(status),
            message: Set(message),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        if let Err(e) = entry.insert(&self.db).await {
            warn!(
                "Failed to record {} audit entry for {}: {}",
                action, tunnel_name, e
            );
        }
    }

    /// Record the outcome of `result` and hand it back unchanged
    pub async fn outcome<T>(
        &self,
        action: &str,
        tunnel_name: &str,
        tunnel_id: Option<i32>,
        result: Result<T>,
    ) -> Result<T> {
        let (status, message) = match &result {
            Ok(_) => (OperationStatus::Success, None),
            Err(e) => (status_for(e), Some(e.to_string())),
        };
        self.record(action, tunnel_name, tunnel_id, status, message)
            .await;
        result
    }

    /// Newest entries first
    pub async fn recent(&self, limit: u64) -> Result<Vec<operation_log::Model>> {
        Ok(OperationLog::find()
            .order_by_desc(operation_log::Column::CreatedAt)
            .order_by_desc(operation_log::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }
}

fn status_for(err: &ControlError) -> OperationStatus {
    match err.kind() {
        ErrorKind::Timeout => OperationStatus::Timeout,
        _ => OperationStatus::Failed,
    }
}
