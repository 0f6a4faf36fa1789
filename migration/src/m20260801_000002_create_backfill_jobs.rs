use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BackfillJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BackfillJobs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BackfillJobs::Queue).string().not_null())
                    .col(ColumnDef::new(BackfillJobs::Token).string().not_null())
                    .col(ColumnDef::new(BackfillJobs::Network).string().not_null())
                    .col(ColumnDef::new(BackfillJobs::StartDate).date().null())
                    .col(ColumnDef::new(BackfillJobs::EndDate).date().null())
                    .col(ColumnDef::new(BackfillJobs::RequestId).string().not_null())
                    .col(ColumnDef::new(BackfillJobs::Status).string().not_null())
                    .col(
                        ColumnDef::new(BackfillJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BackfillJobs::Progress)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(BackfillJobs::RunAfter).timestamp().not_null())
                    .col(ColumnDef::new(BackfillJobs::Result).json().null())
                    .col(ColumnDef::new(BackfillJobs::LastError).string().null())
                    .col(
                        ColumnDef::new(BackfillJobs::CreatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .col(
                        ColumnDef::new(BackfillJobs::UpdatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim queries scan one queue for runnable work
        manager
            .create_index(
                Index::create()
                    .name("idx_backfill_jobs_queue_status_run_after")
                    .table(BackfillJobs::Table)
                    .col(BackfillJobs::Queue)
                    .col(BackfillJobs::Status)
                    .col(BackfillJobs::RunAfter)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BackfillJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BackfillJobs {
    Table,
    Id,
    Queue,
    Token,
    Network,
    StartDate,
    EndDate,
    RequestId,
    Status,
    Attempts,
    Progress,
    RunAfter,
    Result,
    LastError,
    CreatedAt,
    UpdatedAt,
}
