use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrawlJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CrawlJobs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CrawlJobs::Kind).string().not_null())
                    .col(ColumnDef::new(CrawlJobs::Url).text().not_null())
                    .col(
                        ColumnDef::new(CrawlJobs::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CrawlJobs::Status).string().not_null())
                    .col(ColumnDef::new(CrawlJobs::CreatedAt).string().not_null())
                    .col(ColumnDef::new(CrawlJobs::StartedAt).string().null())
                    .col(ColumnDef::new(CrawlJobs::CompletedAt).string().null())
                    .col(ColumnDef::new(CrawlJobs::SlaDeadline).string().not_null())
                    .col(
                        ColumnDef::new(CrawlJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CrawlJobs::ResultJson).text().null())
                    .col(ColumnDef::new(CrawlJobs::Error).text().null())
                    .col(ColumnDef::new(CrawlJobs::UpdatedAt).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawl_jobs_status")
                    .table(CrawlJobs::Table)
                    .col(CrawlJobs::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CrawlJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrawlJobs {
    Table,
    Id,
    Kind,
    Url,
    Priority,
    Status,
    CreatedAt,
    StartedAt,
    CompletedAt,
    SlaDeadline,
    RetryCount,
    ResultJson,
    Error,
    UpdatedAt,
}
