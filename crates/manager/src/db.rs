use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use ssl_manager_common::DatabaseConfig;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ssl_manager_migration::Migrator;

/// 建立连接池并执行迁移；启动时连不上数据库直接失败
pub async fn init_db(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.health_check_period)
        .test_before_acquire(true)
        .sqlx_logging(false);

    let db = tokio::time::timeout(config.connect_timeout * 2, async {
        let db = Database::connect(options).await?;
        db.ping().await?;
        Ok::<_, sea_orm::DbErr>(db)
    })
    .await
    .context("timed out connecting to database")?
    .context("failed to connect to database")?;

    Migrator::up(&db, None)
        .await
        .context("failed to run migrations")?;
    info!(max_connections = config.max_connections, "Database ready");
    Ok(db)
}

/// 周期性探活，失败只告警，连接池会在下次获取时重连
pub fn spawn_health_check(
    db: DatabaseConnection,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = db.ping().await {
                        warn!(error = %err, "Database health check failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
