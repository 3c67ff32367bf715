use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SearchCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SearchCache::Fingerprint)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SearchCache::PayloadJson).text().not_null())
                    .col(
                        ColumnDef::new(SearchCache::RecordedAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SearchCache::ExpiresAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_search_cache_expires_at")
                    .table(SearchCache::Table)
                    .col(SearchCache::ExpiresAtMs)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SearchInflight::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SearchInflight::Fingerprint)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SearchInflight::Token).string().not_null())
                    .col(
                        ColumnDef::new(SearchInflight::ExpiresAtMs)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SearchInflight::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SearchCache::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SearchCache {
    Table,
    Fingerprint,
    PayloadJson,
    RecordedAtMs,
    ExpiresAtMs,
}

#[derive(DeriveIden)]
enum SearchInflight {
    Table,
    Fingerprint,
    Token,
    ExpiresAtMs,
}
