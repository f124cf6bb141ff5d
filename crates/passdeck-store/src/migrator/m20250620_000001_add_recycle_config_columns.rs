//! Migration to keep the full tunnel configuration in the recycle bin
//! TLS material paths, log level and concurrency bounds were not archived before

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // SQLite accepts one column per ALTER TABLE
        for column in [
            ColumnDef::new(TunnelRecycle::CertPath).text().null().to_owned(),
            ColumnDef::new(TunnelRecycle::KeyPath).text().null().to_owned(),
            ColumnDef::new(TunnelRecycle::LogLevel).string_len(16).null().to_owned(),
            ColumnDef::new(TunnelRecycle::MinConcurrency).integer().null().to_owned(),
            ColumnDef::new(TunnelRecycle::MaxConcurrency).integer().null().to_owned(),
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(TunnelRecycle::Table)
                        .add_column(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for column in [
            TunnelRecycle::MaxConcurrency,
            TunnelRecycle::MinConcurrency,
            TunnelRecycle::LogLevel,
            TunnelRecycle::KeyPath,
            TunnelRecycle::CertPath,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(TunnelRecycle::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }
}

#[derive(DeriveIden)]
enum TunnelRecycle {
    Table,
    CertPath,
    KeyPath,
    LogLevel,
    MinConcurrency,
    MaxConcurrency,
}
