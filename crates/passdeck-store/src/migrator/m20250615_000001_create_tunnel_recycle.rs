//! Migration to add the tunnel recycle bin
//! Deleting with `recycle` archives the row here instead of purging it

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TunnelRecycle::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TunnelRecycle::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TunnelRecycle::OriginalId).integer().not_null())
                    .col(ColumnDef::new(TunnelRecycle::InstanceId).string_len(128).null())
                    .col(ColumnDef::new(TunnelRecycle::Name).string_len(255).not_null())
                    .col(ColumnDef::new(TunnelRecycle::EndpointId).integer().not_null())
                    .col(ColumnDef::new(TunnelRecycle::Mode).string_len(16).not_null())
                    .col(
                        ColumnDef::new(TunnelRecycle::TunnelAddress)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(TunnelRecycle::TunnelPort).integer().not_null())
                    .col(
                        ColumnDef::new(TunnelRecycle::TargetAddress)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(TunnelRecycle::TargetPort).integer().not_null())
                    .col(ColumnDef::new(TunnelRecycle::TlsMode).string_len(16).not_null())
                    .col(ColumnDef::new(TunnelRecycle::CommandLine).text().not_null())
                    .col(
                        ColumnDef::new(TunnelRecycle::TcpRx)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TunnelRecycle::TcpTx)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TunnelRecycle::UdpRx)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TunnelRecycle::UdpTx)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TunnelRecycle::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TunnelRecycle::DeletedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnel_recycle_endpoint_id")
                    .table(TunnelRecycle::Table)
                    .col(TunnelRecycle::EndpointId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_tunnel_recycle_endpoint_id")
                    .table(TunnelRecycle::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TunnelRecycle::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum TunnelRecycle {
    Table,
    Id,
    OriginalId,
    InstanceId,
    Name,
    EndpointId,
    Mode,
    TunnelAddress,
    TunnelPort,
    TargetAddress,
    TargetPort,
    TlsMode,
    CommandLine,
    TcpRx,
    TcpTx,
    UdpRx,
    UdpTx,
    CreatedAt,
    DeletedAt,
}
