//! 测试用的内存数据库与协作方替身

use crate::gateway::{NewCertificate, PersistenceGateway, now_tz};
use crate::orchestrator::LifecycleOrchestrator;
use crate::provider::{CertificateMaterial, CertificateProvider};
use crate::reload::ReloadSignaler;
use crate::store::{FsKeyStore, KeyMaterialPaths, KeyMaterialStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use sea_orm_migration::MigratorTrait;
use ssl_manager_common::entities::{domains, events};
use ssl_manager_common::models::CreateDomainRequest;
use ssl_manager_common::{DomainRecord, ManagerError, Result};
use ssl_manager_migration::Migrator;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// 单连接的内存 sqlite；多连接会各自看到一个空库
pub async fn test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

enum Outcome {
    Fail(String),
    ExpiringAt(DateTime<Utc>),
}

/// 默认每次签发 90 天有效期，且每次调用都比上一次晚一分钟
#[derive(Default)]
pub struct FakeProvider {
    queued: Mutex<VecDeque<Outcome>>,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn fail_next(&self, message: &str) {
        self.queued
            .lock()
            .unwrap()
            .push_back(Outcome::Fail(message.to_string()));
    }

    pub fn issue_expiring_at(&self, valid_to: DateTime<Utc>) {
        self.queued
            .lock()
            .unwrap()
            .push_back(Outcome::ExpiringAt(valid_to));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateProvider for FakeProvider {
    async fn create_certificate(&self, domain: &str) -> Result<CertificateMaterial> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        let now = Utc::now();
        let valid_to = match self.queued.lock().unwrap().pop_front() {
            Some(Outcome::Fail(message)) => return Err(ManagerError::provider(message)),
            Some(Outcome::ExpiringAt(valid_to)) => valid_to,
            None => now + ChronoDuration::days(90) + ChronoDuration::minutes(call),
        };
        Ok(CertificateMaterial {
            cert_pem: format!("CERT {domain} #{call}\n"),
            key_pem: format!("KEY {domain} #{call}\n"),
            chain_pem: format!("CHAIN {domain} #{call}\n"),
            issuer: "Fake CA".to_string(),
            valid_from: now,
            valid_to,
        })
    }
}

#[derive(Default)]
pub struct FakeReloader {
    calls: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeReloader {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReloadSignaler for FakeReloader {
    async fn reload(&self, container: &str) -> Result<()> {
        self.calls.lock().unwrap().push(container.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ManagerError::reload(format!("container {container} not running")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum SaveFault {
    /// 写完 cert.pem 后报错
    PartialWrite,
    /// 写盘成功，但抢先插入一条存活证书，使登记的第二个事务失败
    CertificateConflict,
}

/// 包装 [`FsKeyStore`]，可按需注入一次写盘故障
pub struct FlakyStore {
    inner: FsKeyStore,
    root: PathBuf,
    gateway: PersistenceGateway,
    fault: Mutex<Option<SaveFault>>,
}

impl FlakyStore {
    pub fn fail_next_save(&self) {
        *self.fault.lock().unwrap() = Some(SaveFault::PartialWrite);
    }

    pub fn conflict_on_next_save(&self) {
        *self.fault.lock().unwrap() = Some(SaveFault::CertificateConflict);
    }
}

#[async_trait]
impl KeyMaterialStore for FlakyStore {
    async fn save(&self, domain: &str, material: &CertificateMaterial) -> Result<KeyMaterialPaths> {
        let fault = self.fault.lock().unwrap().take();
        match fault {
            None => self.inner.save(domain, material).await,
            Some(SaveFault::PartialWrite) => {
                let dir = self.root.join(domain);
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("cert.pem"), &material.cert_pem)?;
                Err(std::io::Error::other("disk full").into())
            }
            Some(SaveFault::CertificateConflict) => {
                let paths = self.inner.save(domain, material).await?;
                let domain_id = self
                    .gateway
                    .domain_id_by_name(domain)
                    .await?
                    .ok_or_else(|| ManagerError::not_found(domain))?;
                let now = now_tz();
                let tx = self.gateway.begin().await?;
                self.gateway
                    .insert_tx(
                        &tx,
                        NewCertificate {
                            domain_id,
                            issuer: "Other CA".to_string(),
                            cert_path: "/elsewhere/cert.pem".to_string(),
                            key_path: "/elsewhere/key.pem".to_string(),
                            chain_path: None,
                            valid_from: now,
                            valid_to: now + ChronoDuration::days(90),
                            last_renewal: None,
                            created_by: "someone-else".to_string(),
                        },
                    )
                    .await?;
                self.gateway.commit(tx).await?;
                Ok(paths)
            }
        }
    }

    async fn delete(&self, paths: &KeyMaterialPaths) -> Result<()> {
        self.inner.delete(paths).await
    }

    async fn purge(&self, domain: &str) -> Result<()> {
        self.inner.purge(domain).await
    }
}

pub struct Harness {
    pub db: DatabaseConnection,
    pub gateway: PersistenceGateway,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub provider: Arc<FakeProvider>,
    pub reloader: Arc<FakeReloader>,
    pub store: Arc<FlakyStore>,
    pub certs: TempDir,
}

pub async fn harness() -> Harness {
    let db = test_db().await;
    let gateway = PersistenceGateway::new(db.clone(), Duration::from_secs(5));
    let certs = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::default());
    let reloader = Arc::new(FakeReloader::default());
    let store = Arc::new(FlakyStore {
        inner: FsKeyStore::new(certs.path()),
        root: certs.path().to_path_buf(),
        gateway: gateway.clone(),
        fault: Mutex::new(None),
    });
    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        gateway.clone(),
        provider.clone(),
        store.clone(),
        reloader.clone(),
        "system-renewal",
    ));
    Harness {
        db,
        gateway,
        orchestrator,
        provider,
        reloader,
        store,
        certs,
    }
}

impl Harness {
    pub async fn record(&self, id: Uuid) -> DomainRecord {
        self.gateway.domain_record(id).await.unwrap().unwrap()
    }

    /// 包括已软删除的行
    pub async fn raw_domain(&self, id: Uuid) -> domains::Model {
        domains::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn domain_id(&self, name: &str) -> Uuid {
        self.gateway.domain_id_by_name(name).await.unwrap().unwrap()
    }

    pub async fn live_domains(&self) -> u64 {
        domains::Entity::find()
            .filter(domains::Column::DeletedAt.is_null())
            .count(&self.db)
            .await
            .unwrap()
    }
}

pub fn request(domain: &str) -> CreateDomainRequest {
    CreateDomainRequest {
        domain: domain.to_string(),
        verification_method: None,
        auto_renew: true,
        nginx_container_name: None,
    }
}

pub async fn events_for(db: &DatabaseConnection, domain_id: Uuid) -> Vec<events::Model> {
    events::Entity::find()
        .filter(events::Column::DomainId.eq(domain_id))
        .order_by_asc(events::Column::CreatedAt)
        .all(db)
        .await
        .unwrap()
}
