//! Database migrations

use sea_orm_migration::prelude::*;

mod m20250601_000001_init_schema;
mod m20250615_000001_create_tunnel_recycle;
mod m20250620_000001_add_recycle_config_columns;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250601_000001_init_schema::Migration),
            Box::new(m20250615_000001_create_tunnel_recycle::Migration),
            Box::new(m20250620_000001_add_recycle_config_columns::Migration),
        ]
    }
}
