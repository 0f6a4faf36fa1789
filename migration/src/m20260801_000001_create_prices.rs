use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Prices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Prices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Prices::Token).string().not_null())
                    .col(ColumnDef::new(Prices::Network).string().not_null())
                    .col(ColumnDef::new(Prices::UnixTs).big_integer().not_null())
                    .col(ColumnDef::new(Prices::IsoDate).string().not_null())
                    .col(
                        ColumnDef::new(Prices::Price)
                            .decimal_len(30, 10)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Prices::Source).string().not_null())
                    .col(ColumnDef::new(Prices::Confidence).double().not_null())
                    .col(
                        ColumnDef::new(Prices::CreatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .col(
                        ColumnDef::new(Prices::UpdatedAt)
                            .timestamp()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique constraint: one price per token per network per second
        manager
            .create_index(
                Index::create()
                    .name("idx_prices_unique")
                    .table(Prices::Table)
                    .col(Prices::Token)
                    .col(Prices::Network)
                    .col(Prices::UnixTs)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Descending traversal for straddling lookups (newest point at or
        // before a target timestamp)
        manager
            .create_index(
                Index::create()
                    .name("idx_prices_token_network_ts_desc")
                    .table(Prices::Table)
                    .col(Prices::Token)
                    .col(Prices::Network)
                    .col((Prices::UnixTs, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Prices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Prices {
    Table,
    Id,
    Token,
    Network,
    UnixTs,
    IsoDate,
    Price,
    Source,
    Confidence,
    CreatedAt,
    UpdatedAt,
}
