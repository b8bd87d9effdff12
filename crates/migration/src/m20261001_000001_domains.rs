use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Domains::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Domains::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Domains::DomainName).string_len(253).not_null())
                    .col(ColumnDef::new(Domains::Status).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Domains::AutoRenew)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Domains::VerificationMethod)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Domains::NginxContainerName).string().null())
                    .col(ColumnDef::new(Domains::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(Domains::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Domains::UpdatedBy).string().null())
                    .col(
                        ColumnDef::new(Domains::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Domains::DeletedBy).string().null())
                    .col(
                        ColumnDef::new(Domains::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Only one live row per name; soft-deleted rows keep their history.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS domains_live_name_uidx \
                 ON domains (domain_name) WHERE deleted_at IS NULL",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("domains_created_by_idx")
                    .table(Domains::Table)
                    .col(Domains::CreatedBy)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Domains::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
pub(crate) enum Domains {
    Table,
    Id,
    DomainName,
    Status,
    AutoRenew,
    VerificationMethod,
    NginxContainerName,
    CreatedBy,
    CreatedAt,
    UpdatedBy,
    UpdatedAt,
    DeletedBy,
    DeletedAt,
}
