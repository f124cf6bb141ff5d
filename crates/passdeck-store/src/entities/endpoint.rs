//! Endpoint entity: a registered remote agent

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "endpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Display name (unique)
    #[sea_orm(unique)]
    pub name: String,

    /// Base address of the agent, e.g. `http://10.0.0.5:3000`
    pub url: String,

    /// API prefix appended to `url`, e.g. `/api`
    pub api_path: String,

    /// Credential sent as `X-API-Key`
    #[serde(skip_serializing)]
    pub api_key: String,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tunnel::Entity")]
    Tunnels,
}

impl Related<super::tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tunnels.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
