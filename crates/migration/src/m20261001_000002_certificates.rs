use sea_orm_migration::prelude::*;

use crate::m20261001_000001_domains::Domains;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Certificates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Certificates::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Certificates::DomainId).uuid().not_null())
                    .col(ColumnDef::new(Certificates::Issuer).text().not_null())
                    .col(ColumnDef::new(Certificates::CertPath).text().not_null())
                    .col(ColumnDef::new(Certificates::KeyPath).text().not_null())
                    .col(ColumnDef::new(Certificates::ChainPath).text().null())
                    .col(
                        ColumnDef::new(Certificates::ValidFrom)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::ValidTo)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::LastRenewal)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::RenewalAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Certificates::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Certificates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Certificates::UpdatedBy).string().null())
                    .col(
                        ColumnDef::new(Certificates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Certificates::DeletedBy).string().null())
                    .col(
                        ColumnDef::new(Certificates::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("certificates_domain_fk")
                            .from(Certificates::Table, Certificates::DomainId)
                            .to(Domains::Table, Domains::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one live certificate per domain.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS certificates_live_domain_uidx \
                 ON certificates (domain_id) WHERE deleted_at IS NULL",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("certificates_valid_to_idx")
                    .table(Certificates::Table)
                    .col(Certificates::ValidTo)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Certificates::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Certificates {
    Table,
    Id,
    DomainId,
    Issuer,
    CertPath,
    KeyPath,
    ChainPath,
    ValidFrom,
    ValidTo,
    LastRenewal,
    RenewalAttempts,
    CreatedBy,
    CreatedAt,
    UpdatedBy,
    UpdatedAt,
    DeletedBy,
    DeletedAt,
}
