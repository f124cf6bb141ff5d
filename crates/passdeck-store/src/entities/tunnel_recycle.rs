//! Recycle bin: archived copies of deleted tunnels

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::tunnel::{LogLevel, TlsMode, TunnelMode};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnel_recycle")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Local id the tunnel had while it was live
    pub original_id: i32,

    pub instance_id: Option<String>,

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

    #[sea_orm(column_type = "Text")]
    pub command_line: String,

    pub tcp_rx: i64,
    pub tcp_tx: i64,
    pub udp_rx: i64,
    pub udp_tx: i64,

    pub created_at: ChronoDateTimeUtc,

    pub deleted_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
