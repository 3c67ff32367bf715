use sea_orm_migration::prelude::*;

mod m20240101_initial;
mod m20260128_add_search_cache;
mod m20260217_add_rate_limit_windows;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_initial::Migration),
            Box::new(m20260128_add_search_cache::Migration),
            Box::new(m20260217_add_rate_limit_windows::Migration),
        ]
    }
}
