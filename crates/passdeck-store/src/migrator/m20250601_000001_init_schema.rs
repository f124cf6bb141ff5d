//! Initial schema: endpoints, tunnels, operation logs and telemetry events

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. Create endpoints table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Endpoint::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Endpoint::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Endpoint::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Endpoint::Url).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Endpoint::ApiPath)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Endpoint::ApiKey).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Endpoint::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. Create tunnels table
        // ============================================================
        // endpoint_id is a weak reference: endpoint removal is handled
        // outside the orchestration core, so no foreign key is declared.
        manager
            .create_table(
                Table::create()
                    .table(Tunnel::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tunnel::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tunnel::InstanceId).string_len(128).null().unique_key())
                    .col(
                        ColumnDef::new(Tunnel::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Tunnel::EndpointId).integer().not_null())
                    .col(ColumnDef::new(Tunnel::Mode).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Tunnel::TunnelAddress)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Tunnel::TunnelPort).integer().not_null())
                    .col(ColumnDef::new(Tunnel::TargetAddress).string_len(255).not_null())
                    .col(ColumnDef::new(Tunnel::TargetPort).integer().not_null())
                    .col(
                        ColumnDef::new(Tunnel::TlsMode)
                            .string_len(16)
                            .not_null()
                            .default("off"),
                    )
                    .col(ColumnDef::new(Tunnel::CertPath).text().null())
                    .col(ColumnDef::new(Tunnel::KeyPath).text().null())
                    .col(ColumnDef::new(Tunnel::LogLevel).string_len(16).null())
                    .col(ColumnDef::new(Tunnel::MinConcurrency).integer().null())
                    .col(ColumnDef::new(Tunnel::MaxConcurrency).integer().null())
                    .col(
                        ColumnDef::new(Tunnel::Status)
                            .string_len(16)
                            .not_null()
                            .default("stopped"),
                    )
                    .col(ColumnDef::new(Tunnel::TcpRx).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Tunnel::TcpTx).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Tunnel::UdpRx).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Tunnel::UdpTx).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Tunnel::CommandLine).text().not_null())
                    .col(
                        ColumnDef::new(Tunnel::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tunnel::UpdatedAt)
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
                    .name("idx_tunnels_endpoint_id")
                    .table(Tunnel::Table)
                    .col(Tunnel::EndpointId)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. Create operation_logs table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(OperationLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OperationLog::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OperationLog::TunnelId).integer().null())
                    .col(
                        ColumnDef::new(OperationLog::TunnelName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OperationLog::Action).string_len(32).not_null())
                    .col(ColumnDef::new(OperationLog::Status).string_len(16).not_null())
                    .col(ColumnDef::new(OperationLog::Message).text().null())
                    .col(
                        ColumnDef::new(OperationLog::CreatedAt)
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
                    .name("idx_operation_logs_created_at")
                    .table(OperationLog::Table)
                    .col(OperationLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 4. Create endpoint_events table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(EndpointEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EndpointEvent::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EndpointEvent::EndpointId).integer().not_null())
                    .col(
                        ColumnDef::new(EndpointEvent::InstanceId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EndpointEvent::EventType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EndpointEvent::InstanceType).string_len(16).null())
                    .col(ColumnDef::new(EndpointEvent::Status).string_len(16).null())
                    .col(ColumnDef::new(EndpointEvent::Logs).text().null())
                    .col(ColumnDef::new(EndpointEvent::TcpRx).big_integer().null())
                    .col(ColumnDef::new(EndpointEvent::TcpTx).big_integer().null())
                    .col(ColumnDef::new(EndpointEvent::UdpRx).big_integer().null())
                    .col(ColumnDef::new(EndpointEvent::UdpTx).big_integer().null())
                    .col(
                        ColumnDef::new(EndpointEvent::EventTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EndpointEvent::CreatedAt)
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
                    .name("idx_endpoint_events_instance_time")
                    .table(EndpointEvent::Table)
                    .col(EndpointEvent::EndpointId)
                    .col(EndpointEvent::InstanceId)
                    .col(EndpointEvent::EventTime)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EndpointEvent::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(OperationLog::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Tunnel::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Endpoint::Table).to_owned())
            .await?;

        Ok(())
    }
}

// ============================================================
// Table identifiers
// ============================================================

#[derive(DeriveIden)]
enum Endpoint {
    #[sea_orm(iden = "endpoints")]
    Table,
    Id,
    Name,
    Url,
    ApiPath,
    ApiKey,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tunnel {
    #[sea_orm(iden = "tunnels")]
    Table,
    Id,
    InstanceId,
    Name,
    EndpointId,
    Mode,
    TunnelAddress,
    TunnelPort,
    TargetAddress,
    TargetPort,
    TlsMode,
    CertPath,
    KeyPath,
    LogLevel,
    MinConcurrency,
    MaxConcurrency,
    Status,
    TcpRx,
    TcpTx,
    UdpRx,
    UdpTx,
    CommandLine,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OperationLog {
    #[sea_orm(iden = "operation_logs")]
    Table,
    Id,
    TunnelId,
    TunnelName,
    Action,
    Status,
    Message,
    CreatedAt,
}

#[derive(DeriveIden)]
enum EndpointEvent {
    #[sea_orm(iden = "endpoint_events")]
    Table,
    Id,
    EndpointId,
    InstanceId,
    EventType,
    InstanceType,
    Status,
    Logs,
    TcpRx,
    TcpTx,
    UdpRx,
    UdpTx,
    EventTime,
    CreatedAt,
}
