mod acme;
mod api;
mod db;
mod gateway;
mod locks;
mod metrics;
mod orchestrator;
mod provider;
mod reload;
mod scheduler;
mod state;
mod store;
#[cfg(test)]
mod testing;

use crate::acme::{AcmeChallengeStore, AcmeProvider, AcmeSettings};
use crate::db::{init_db, spawn_health_check};
use crate::gateway::PersistenceGateway;
use crate::orchestrator::LifecycleOrchestrator;
use crate::reload::ContainerReloader;
use crate::scheduler::RenewalScheduler;
use crate::state::AppState;
use crate::store::FsKeyStore;
use anyhow::Result;
use ssl_manager_common::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    let db = init_db(&config.database).await?;
    let gateway = PersistenceGateway::new(db.clone(), config.database.operation_timeout);

    let challenges = AcmeChallengeStore::default();
    let provider = AcmeProvider::new(
        AcmeSettings {
            directory_url: config.acme_directory_url.clone(),
            contact_email: config.acme_contact_email.clone(),
            storage_dir: config.acme_storage_dir.clone(),
        },
        challenges.clone(),
    );
    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        gateway,
        Arc::new(provider),
        Arc::new(FsKeyStore::new(config.certs_dir.clone())),
        Arc::new(ContainerReloader::new(config.container_runtime.clone())),
        config.system_actor.clone(),
    ));
    let scheduler = Arc::new(RenewalScheduler::new(
        orchestrator.clone(),
        config.renewal_interval(),
        config.renewal_threshold(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = scheduler.clone().spawn(shutdown_rx.clone());
    let health_task = spawn_health_check(db, config.database.health_check_period, shutdown_rx);

    let state = AppState {
        orchestrator,
        scheduler,
        challenges,
    };

    let listen_addr = config.listen_addr.clone();
    let api_task = tokio::spawn(async move {
        let app = api::router(state);
        match tokio::net::TcpListener::bind(&listen_addr).await {
            Ok(listener) => {
                info!("ssl manager listening on {}", listen_addr);
                if let Err(err) = axum::serve(listener, app).await {
                    warn!("api server exited: {}", err);
                }
            }
            Err(err) => warn!("failed to bind {}: {}", listen_addr, err),
        }
    });

    tokio::select! {
        _ = api_task => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    // 等待进行中的扫描结束
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(30), scheduler_task)
        .await
        .is_err()
    {
        warn!("renewal scheduler did not stop within 30s");
    }
    health_task.abort();

    Ok(())
}
