pub use sea_orm_migration::prelude::*;

mod m20261001_000001_domains;
mod m20261001_000002_certificates;
mod m20261001_000003_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_domains::Migration),
            Box::new(m20261001_000002_certificates::Migration),
            Box::new(m20261001_000003_events::Migration),
        ]
    }
}
