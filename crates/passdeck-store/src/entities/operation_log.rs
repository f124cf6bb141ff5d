//! OperationLog entity: immutable audit trail of orchestration actions

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Outcome recorded for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[sea_orm(string_value = "success")]
    Success,

    #[sea_orm(string_value = "failed")]
    Failed,

    /// The request was accepted but confirmation was not observed in time
    #[sea_orm(string_value = "timeout")]
    Timeout,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operation_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Local id of the tunnel, when one was involved
    pub tunnel_id: Option<i32>,

    pub tunnel_name: String,

    /// Action name, e.g. `create`, `delete`, `start`
    pub action: String,

    pub status: OperationStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
