//! 域名与证书生命周期编排
//!
//! 数据库状态变更全部经由 [`PersistenceGateway`] 的事务完成；签发、写盘与重载都在事务之外执行，
//! 失败时显式补偿或记录，保证数据库与磁盘上实际发生的事情一致。
//!
//! 同一域名的登记、续期与删除由 [`DomainLocks`] 串行化，不同域名之间可以并发。

use crate::gateway::{
    CertificatePatch, DomainPatch, NewCertificate, NewDomain, NewEvent, PersistenceGateway,
    now_tz,
};
use crate::locks::DomainLocks;
use crate::metrics;
use crate::provider::{CertificateMaterial, CertificateProvider};
use crate::reload::ReloadSignaler;
use crate::store::{KeyMaterialPaths, KeyMaterialStore};
use ssl_manager_common::entities::{DomainStatus, EventType, domains};
use ssl_manager_common::models::{CreateDomainRequest, ListDomainsQuery};
use ssl_manager_common::{
    DomainFilters, DomainPage, DomainRecord, DomainRef, ManagerError, Result,
    normalize_domain_name, normalize_verification_method,
};
use sea_orm::DatabaseTransaction;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct LifecycleOrchestrator {
    gateway: PersistenceGateway,
    provider: Arc<dyn CertificateProvider>,
    store: Arc<dyn KeyMaterialStore>,
    reloader: Arc<dyn ReloadSignaler>,
    locks: DomainLocks,
    system_actor: String,
}

fn ensure_transition(domain: &domains::Model, next: DomainStatus) -> Result<()> {
    if domain.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(ManagerError::InvalidTransition {
            from: domain.status,
            to: next,
        })
    }
}

impl LifecycleOrchestrator {
    pub fn new(
        gateway: PersistenceGateway,
        provider: Arc<dyn CertificateProvider>,
        store: Arc<dyn KeyMaterialStore>,
        reloader: Arc<dyn ReloadSignaler>,
        system_actor: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            provider,
            store,
            reloader,
            locks: DomainLocks::default(),
            system_actor: system_actor.into(),
        }
    }

    pub fn system_actor(&self) -> &str {
        &self.system_actor
    }

    /// 登记域名并签发首张证书
    ///
    /// 1. 独立事务插入 `pending` 行，唯一索引冲突即 `DomainExists`
    /// 2. 无事务地调用签发方并写盘
    /// 3. 第二个事务写入证书、置 `active` 并追加 `created` 事件
    ///
    /// 第 2、3 步失败时域名保留为 `renewal_failed` 并追加 `failed` 事件，已写的文件被清理。
    pub async fn register_domain(&self, request: CreateDomainRequest, actor: &str) -> Result<Uuid> {
        let name = normalize_domain_name(&request.domain)?;
        let verification_method =
            normalize_verification_method(request.verification_method.as_deref())?;
        let nginx_container_name = request
            .nginx_container_name
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        // 唯一索引兜底并发登记，这里只提前拒绝明显的重复
        if self.gateway.domain_exists_by_name(&name).await? {
            metrics::record_registration("conflict");
            return Err(ManagerError::DomainExists(name));
        }

        let tx = self.gateway.begin().await?;
        let inserted = self
            .gateway
            .insert_tx(
                &tx,
                NewDomain {
                    domain_name: name.clone(),
                    status: DomainStatus::Pending,
                    auto_renew: request.auto_renew,
                    verification_method,
                    nginx_container_name,
                    created_by: actor.to_string(),
                },
            )
            .await;
        let domain_id = match inserted {
            Ok(id) => id,
            Err(err) => {
                self.rollback_quietly(tx).await;
                return Err(self.conflict_or(err, &name));
            }
        };
        self.gateway
            .commit(tx)
            .await
            .map_err(|err| self.conflict_or(err, &name))?;

        let _guard = self.locks.acquire(domain_id).await;
        info!(domain = %name, %domain_id, "Domain registered, requesting certificate");

        let material = match self.issue(&name, None).await {
            Ok(material) => material,
            Err(err) => {
                warn!(domain = %name, error = %err, "Certificate issuance failed");
                self.mark_registration_failed(domain_id, &name, &err, actor).await;
                metrics::record_registration("failed");
                return Err(err);
            }
        };

        let paths = match self.store.save(&name, &material).await {
            Ok(paths) => paths,
            Err(err) => {
                error!(domain = %name, error = %err, "Failed to store key material");
                // 新登记的域名没有存活证书，目录里只可能是本次写到一半的文件
                if let Err(purge_err) = self.store.purge(&name).await {
                    warn!(domain = %name, error = %purge_err, "Failed to remove partial key material");
                }
                self.mark_registration_failed(domain_id, &name, &err, actor).await;
                metrics::record_registration("failed");
                return Err(err);
            }
        };

        if let Err(err) = self
            .finish_registration(domain_id, &material, &paths, actor)
            .await
        {
            error!(domain = %name, error = %err, "Failed to record issued certificate");
            self.discard_files(&name, &paths).await;
            self.mark_registration_failed(domain_id, &name, &err, actor).await;
            metrics::record_registration("failed");
            return Err(err);
        }

        metrics::record_registration("created");
        info!(domain = %name, %domain_id, valid_to = %material.valid_to, "Domain active");
        Ok(domain_id)
    }

    async fn finish_registration(
        &self,
        domain_id: Uuid,
        material: &CertificateMaterial,
        paths: &KeyMaterialPaths,
        actor: &str,
    ) -> Result<()> {
        let tx = self.gateway.begin().await?;
        let domain = self
            .gateway
            .domain_tx(&tx, domain_id)
            .await?
            .ok_or_else(|| ManagerError::not_found(domain_id.to_string()))?;
        ensure_transition(&domain, DomainStatus::Active)?;

        self.gateway
            .insert_tx(
                &tx,
                NewCertificate {
                    domain_id,
                    issuer: material.issuer.clone(),
                    cert_path: paths.cert(),
                    key_path: paths.key(),
                    chain_path: paths.chain(),
                    valid_from: material.valid_from.fixed_offset(),
                    valid_to: material.valid_to.fixed_offset(),
                    last_renewal: None,
                    created_by: actor.to_string(),
                },
            )
            .await?;
        self.gateway
            .update_tx(
                &tx,
                domain_id,
                DomainPatch {
                    status: Some(DomainStatus::Active),
                    updated_by: Some(actor.to_string()),
                    updated_at: Some(now_tz()),
                    ..Default::default()
                },
            )
            .await?;
        self.gateway
            .insert_tx(
                &tx,
                NewEvent {
                    domain_id,
                    event_type: EventType::Created,
                    message: "Domain and certificate created successfully".to_string(),
                    created_by: actor.to_string(),
                },
            )
            .await?;
        self.gateway.commit(tx).await
    }

    /// 首次签发失败：尽力将域名置为 `renewal_failed` 并追加 `failed` 事件
    async fn mark_registration_failed(
        &self,
        domain_id: Uuid,
        name: &str,
        cause: &ManagerError,
        actor: &str,
    ) {
        let result: Result<()> = async {
            let tx = self.gateway.begin().await?;
            if let Some(domain) = self.gateway.domain_tx(&tx, domain_id).await? {
                if domain.status != DomainStatus::RenewalFailed
                    && domain.status.can_transition_to(DomainStatus::RenewalFailed)
                {
                    self.gateway
                        .update_tx(
                            &tx,
                            domain_id,
                            DomainPatch {
                                status: Some(DomainStatus::RenewalFailed),
                                updated_by: Some(actor.to_string()),
                                updated_at: Some(now_tz()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
            self.gateway
                .insert_tx(
                    &tx,
                    NewEvent {
                        domain_id,
                        event_type: EventType::Failed,
                        message: format!("Certificate issuance failed: {}", cause),
                        created_by: actor.to_string(),
                    },
                )
                .await?;
            self.gateway.commit(tx).await
        }
        .await;

        if let Err(err) = result {
            metrics::inc_event_write_failure();
            error!(domain = %name, error = %err, "Failed to record issuance failure");
        }
    }

    /// 软删除域名及其证书；提交前尽力删除磁盘文件，失败只告警
    pub async fn delete_domain(&self, target: DomainRef, actor: &str) -> Result<()> {
        let domain_id = match &target {
            DomainRef::Id(id) => *id,
            DomainRef::Name(name) => self
                .gateway
                .domain_id_by_name(name)
                .await?
                .ok_or_else(|| ManagerError::not_found(name.clone()))?,
        };

        let _guard = self.locks.acquire(domain_id).await;
        let tx = self.gateway.begin().await?;
        let domain = self
            .gateway
            .domain_tx(&tx, domain_id)
            .await?
            .ok_or_else(|| ManagerError::not_found(target.to_string()))?;
        if let DomainRef::Name(name) = &target {
            // 加锁前名称可能已被删除后重新登记
            if self.gateway.domain_id_by_name_tx(&tx, name).await? != Some(domain_id) {
                self.rollback_quietly(tx).await;
                return Err(ManagerError::not_found(name.clone()));
            }
        }
        ensure_transition(&domain, DomainStatus::Deleted)?;

        let now = now_tz();
        self.gateway
            .update_tx(
                &tx,
                domain_id,
                DomainPatch {
                    status: Some(DomainStatus::Deleted),
                    updated_by: Some(actor.to_string()),
                    updated_at: Some(now),
                    deleted_by: Some(actor.to_string()),
                    deleted_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;

        let certificate = self.gateway.certificate_by_domain_tx(&tx, domain_id).await?;
        if let Some(cert) = &certificate {
            self.gateway
                .update_tx(
                    &tx,
                    cert.id,
                    CertificatePatch {
                        updated_by: Some(actor.to_string()),
                        updated_at: Some(now),
                        deleted_by: Some(actor.to_string()),
                        deleted_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.gateway
            .insert_tx(
                &tx,
                NewEvent {
                    domain_id,
                    event_type: EventType::Deleted,
                    message: format!(
                        "Domain '{}' and its certificates deleted",
                        domain.domain_name
                    ),
                    created_by: actor.to_string(),
                },
            )
            .await?;
        // 材料按名称存放：提交前删除，此时同名的重新登记会被唯一索引拒绝或阻塞
        if let Some(cert) = &certificate {
            self.discard_files(&domain.domain_name, &KeyMaterialPaths::from(cert))
                .await;
        }
        self.gateway.commit(tx).await?;
        info!(domain = %domain.domain_name, %domain_id, actor = %actor, "Domain deleted");
        Ok(())
    }

    /// 为已读取的域名续期
    ///
    /// 签发与写盘在事务外完成，事务内更新证书并追加 `renewed` 事件。提交后才重载反向代理，
    /// 重载失败以 `ManagerError::Reload` 返回，此时续期本身已生效。
    /// 本方法不降级域名状态，失败记录由调用方通过 [`Self::record_renewal_failure`] 完成。
    pub async fn renew_domain(&self, record: &DomainRecord, actor: &str) -> Result<()> {
        let _guard = self.locks.acquire(record.id()).await;

        // 持锁后重新读取，防止与删除交错
        let current = self
            .gateway
            .domain_record(record.id())
            .await?
            .ok_or_else(|| ManagerError::not_found(record.name()))?;
        ensure_transition(&current.domain, DomainStatus::Active)?;
        let name = current.name().to_string();

        let material = self.issue(&name, current.cert_valid_to()).await?;
        let paths = self.store.save(&name, &material).await?;

        let now = now_tz();
        let tx = self.gateway.begin().await?;
        match &current.certificate {
            Some(cert) => {
                self.gateway
                    .update_tx(
                        &tx,
                        cert.id,
                        CertificatePatch {
                            issuer: Some(material.issuer.clone()),
                            cert_path: Some(paths.cert()),
                            key_path: Some(paths.key()),
                            chain_path: paths.chain(),
                            valid_from: Some(material.valid_from.fixed_offset()),
                            valid_to: Some(material.valid_to.fixed_offset()),
                            last_renewal: Some(now),
                            renewal_attempts: Some(0),
                            updated_by: Some(actor.to_string()),
                            updated_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                self.gateway
                    .insert_tx(
                        &tx,
                        NewCertificate {
                            domain_id: current.id(),
                            issuer: material.issuer.clone(),
                            cert_path: paths.cert(),
                            key_path: paths.key(),
                            chain_path: paths.chain(),
                            valid_from: material.valid_from.fixed_offset(),
                            valid_to: material.valid_to.fixed_offset(),
                            last_renewal: Some(now),
                            created_by: actor.to_string(),
                        },
                    )
                    .await?;
            }
        }
        self.gateway
            .update_tx(
                &tx,
                current.id(),
                DomainPatch {
                    status: Some(DomainStatus::Active),
                    updated_by: Some(actor.to_string()),
                    updated_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        self.gateway
            .insert_tx(
                &tx,
                NewEvent {
                    domain_id: current.id(),
                    event_type: EventType::Renewed,
                    message: format!("Certificate for '{}' renewed", name),
                    created_by: actor.to_string(),
                },
            )
            .await?;
        self.gateway.commit(tx).await?;
        info!(domain = %name, valid_to = %material.valid_to, "Certificate renewed");

        if let Some(container) = current.reload_target() {
            match self.reloader.reload(container).await {
                Ok(()) => {}
                Err(ManagerError::Reload(msg)) => return Err(ManagerError::Reload(msg)),
                Err(other) => return Err(ManagerError::reload(other.to_string())),
            }
        }
        Ok(())
    }

    /// 独立事务尽力记录续期失败：追加 `renewal_failed` 事件，累加尝试次数，
    /// `active` 域名降级为 `renewal_failed`
    pub async fn record_renewal_failure(
        &self,
        domain_id: Uuid,
        cause: &ManagerError,
        actor: &str,
    ) -> Result<()> {
        let _guard = self.locks.acquire(domain_id).await;
        let tx = self.gateway.begin().await?;
        let Some(domain) = self.gateway.domain_tx(&tx, domain_id).await? else {
            self.rollback_quietly(tx).await;
            return Ok(());
        };

        let now = now_tz();
        if let Some(cert) = self.gateway.certificate_by_domain_tx(&tx, domain_id).await? {
            self.gateway
                .update_tx(
                    &tx,
                    cert.id,
                    CertificatePatch {
                        renewal_attempts: Some(cert.renewal_attempts.saturating_add(1)),
                        updated_by: Some(actor.to_string()),
                        updated_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
        }

        if domain.status == DomainStatus::Active {
            self.gateway
                .update_tx(
                    &tx,
                    domain_id,
                    DomainPatch {
                        status: Some(DomainStatus::RenewalFailed),
                        updated_by: Some(actor.to_string()),
                        updated_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.gateway
            .insert_tx(
                &tx,
                NewEvent {
                    domain_id,
                    event_type: EventType::RenewalFailed,
                    message: format!("Certificate renewal failed: {}", cause),
                    created_by: actor.to_string(),
                },
            )
            .await?;
        self.gateway.commit(tx).await
    }

    /// 分页查询调用方创建的域名
    pub async fn get_domains(&self, query: &ListDomainsQuery, actor: &str) -> Result<DomainPage> {
        let filters = query.filters(actor);
        let total = self.gateway.domains_count(&filters).await?;
        let records = self
            .gateway
            .domains_list(&filters, Some(query.pagination()))
            .await?;
        Ok(DomainPage::new(
            total,
            query.page(),
            query.page_size(),
            records.iter().map(DomainRecord::summary).collect(),
        ))
    }

    /// 全部未删除域名，供调度器扫描
    pub async fn list_domains(&self) -> Result<Vec<DomainRecord>> {
        self.gateway
            .domains_list(&DomainFilters::default(), None)
            .await
    }

    async fn issue(
        &self,
        name: &str,
        current_valid_to: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<CertificateMaterial> {
        let material = self.provider.create_certificate(name).await?;
        material.ensure_supersedes(current_valid_to)?;
        Ok(material)
    }

    async fn discard_files(&self, name: &str, paths: &KeyMaterialPaths) {
        if let Err(err) = self.store.delete(paths).await {
            warn!(domain = %name, error = %err, "Failed to remove key material");
        }
    }

    async fn rollback_quietly(&self, tx: DatabaseTransaction) {
        if let Err(err) = self.gateway.rollback(tx).await {
            warn!(error = %err, "Rollback failed");
        }
    }

    fn conflict_or(&self, err: ManagerError, name: &str) -> ManagerError {
        if err.is_unique_violation() {
            metrics::record_registration("conflict");
            ManagerError::DomainExists(name.to_string())
        } else {
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, events_for, harness, request};
    use ssl_manager_common::models::DeleteDomainQuery;

    #[tokio::test]
    async fn register_creates_active_domain_with_certificate() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("Example.com"), "alice")
            .await
            .unwrap();

        let record = h.record(id).await;
        assert_eq!(record.domain.domain_name, "example.com");
        assert_eq!(record.domain.status, DomainStatus::Active);
        assert_eq!(record.domain.created_by, "alice");

        let cert = record.certificate.unwrap();
        assert_eq!(cert.renewal_attempts, 0);
        assert!(cert.valid_to > cert.valid_from);
        assert!(std::path::Path::new(&cert.cert_path).exists());
        assert!(std::path::Path::new(&cert.key_path).exists());

        let events = events_for(&h.db, id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let h = harness().await;
        h.orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();

        let err = h
            .orchestrator
            .register_domain(request("EXAMPLE.com."), "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::DomainExists(ref name) if name == "example.com"));
        assert_eq!(h.live_domains().await, 1);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_hostname_is_rejected_before_persistence() {
        let h = harness().await;
        let err = h
            .orchestrator
            .register_domain(request("bad_host!.com"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));

        let mut bad_method = request("example.com");
        bad_method.verification_method = Some("email".to_string());
        let err = h
            .orchestrator
            .register_domain(bad_method, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
        assert_eq!(h.live_domains().await, 0);
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn provider_failure_keeps_domain_visible() {
        let h = harness().await;
        h.provider.fail_next("rate limited");

        let err = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Provider(_)));

        let id = h.domain_id("example.com").await;
        let record = h.record(id).await;
        assert_eq!(record.domain.status, DomainStatus::RenewalFailed);
        assert!(record.certificate.is_none());

        let events = events_for(&h.db, id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Failed);
        assert!(events[0].message.contains("rate limited"));
    }

    #[tokio::test]
    async fn concurrent_registrations_yield_one_domain() {
        let h = harness().await;
        let (a, b) = tokio::join!(
            h.orchestrator.register_domain(request("a.com"), "alice"),
            h.orchestrator.register_domain(request("a.com"), "bob"),
        );

        let outcomes = [a, b];
        let ok = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts = outcomes
            .iter()
            .filter(|r| matches!(r, Err(ManagerError::DomainExists(_))))
            .count();
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(h.live_domains().await, 1);
    }

    #[tokio::test]
    async fn delete_soft_deletes_and_removes_files() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let cert = h.record(id).await.certificate.unwrap();

        let target = DeleteDomainQuery {
            domain_id: None,
            domain_name: Some("example.com".to_string()),
        }
        .target()
        .unwrap();
        h.orchestrator.delete_domain(target, "bob").await.unwrap();

        assert!(h.gateway.domain_record(id).await.unwrap().is_none());
        let stored = h.raw_domain(id).await;
        assert_eq!(stored.status, DomainStatus::Deleted);
        assert_eq!(stored.deleted_by.as_deref(), Some("bob"));
        assert!(stored.deleted_at.is_some());
        assert!(!std::path::Path::new(&cert.cert_path).exists());

        let events = events_for(&h.db, id).await;
        assert_eq!(events.last().unwrap().event_type, EventType::Deleted);
        assert_eq!(
            events.last().unwrap().message,
            "Domain 'example.com' and its certificates deleted"
        );

        // 同名可以重新登记，新材料不受删除影响
        let again = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let fresh = h.record(again).await.certificate.unwrap();
        assert!(std::path::Path::new(&fresh.cert_path).exists());
        assert!(std::path::Path::new(&fresh.key_path).exists());
    }

    #[tokio::test]
    async fn delete_by_name_accepts_registered_spelling() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("Example.com."), "alice")
            .await
            .unwrap();

        let target = DeleteDomainQuery {
            domain_id: None,
            domain_name: Some("Example.com.".to_string()),
        }
        .target()
        .unwrap();
        h.orchestrator.delete_domain(target, "alice").await.unwrap();
        assert_eq!(h.raw_domain(id).await.status, DomainStatus::Deleted);
    }

    #[tokio::test]
    async fn failed_key_write_removes_partial_files() {
        let h = harness().await;
        h.store.fail_next_save();

        let err = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Io(_)));
        assert_eq!(h.provider.calls(), 1);

        let id = h.domain_id("example.com").await;
        assert_eq!(h.record(id).await.domain.status, DomainStatus::RenewalFailed);
        let events = events_for(&h.db, id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Failed);
        assert!(events[0].message.contains("disk full"));
        assert!(!h.certs.path().join("example.com").exists());
    }

    #[tokio::test]
    async fn failed_certificate_insert_discards_saved_files() {
        let h = harness().await;
        h.store.conflict_on_next_save();

        let err = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Database(_)));

        let id = h.domain_id("example.com").await;
        assert_eq!(h.raw_domain(id).await.status, DomainStatus::RenewalFailed);
        let events = events_for(&h.db, id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Failed);

        let dir = h.certs.path().join("example.com");
        for file in ["cert.pem", "key.pem", "chain.pem"] {
            assert!(!dir.join(file).exists(), "{file} left behind");
        }
    }

    #[tokio::test]
    async fn delete_succeeds_with_missing_chain_file() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let cert = h.record(id).await.certificate.unwrap();
        std::fs::remove_file(cert.chain_path.as_ref().unwrap()).unwrap();

        h.orchestrator
            .delete_domain(DomainRef::Id(id), "alice")
            .await
            .unwrap();
        assert_eq!(h.raw_domain(id).await.status, DomainStatus::Deleted);
    }

    #[tokio::test]
    async fn delete_unknown_domain_is_not_found() {
        let h = harness().await;
        let err = h
            .orchestrator
            .delete_domain(DomainRef::Name("missing.com".to_string()), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::DomainNotFound(_)));

        let err = h
            .orchestrator
            .delete_domain(DomainRef::Id(Uuid::new_v4()), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::DomainNotFound(_)));
    }

    #[tokio::test]
    async fn renew_extends_validity_and_reloads() {
        let h = harness().await;
        let mut req = request("example.com");
        req.nginx_container_name = Some("edge-nginx".to_string());
        let id = h.orchestrator.register_domain(req, "alice").await.unwrap();
        let before = h.record(id).await;

        h.orchestrator
            .renew_domain(&before, "system-renewal")
            .await
            .unwrap();

        let after = h.record(id).await;
        let (old, new) = (
            before.certificate.unwrap(),
            after.certificate.clone().unwrap(),
        );
        assert_eq!(old.id, new.id);
        assert!(new.valid_to > old.valid_to);
        assert_eq!(new.renewal_attempts, 0);
        assert!(new.last_renewal.is_some());
        assert_eq!(new.updated_by.as_deref(), Some("system-renewal"));
        assert_eq!(after.domain.status, DomainStatus::Active);
        assert_eq!(h.reloader.calls(), vec!["edge-nginx".to_string()]);

        let events = events_for(&h.db, id).await;
        assert_eq!(events.last().unwrap().event_type, EventType::Renewed);
    }

    #[tokio::test]
    async fn reload_failure_is_partial_success() {
        let h = harness().await;
        let mut req = request("example.com");
        req.nginx_container_name = Some("edge-nginx".to_string());
        let id = h.orchestrator.register_domain(req, "alice").await.unwrap();
        let before = h.record(id).await;

        h.reloader.set_failing(true);
        let err = h
            .orchestrator
            .renew_domain(&before, "system-renewal")
            .await
            .unwrap_err();
        assert!(err.is_partial_success());
        assert!(err.to_string().starts_with("certificate renewed but reload failed"));

        let after = h.record(id).await;
        assert!(after.cert_valid_to() > before.cert_valid_to());
        assert_eq!(
            events_for(&h.db, id).await.last().unwrap().event_type,
            EventType::Renewed
        );
    }

    #[tokio::test]
    async fn stale_material_is_rejected_before_writing() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let before = h.record(id).await;
        let cert_path = before.certificate.as_ref().unwrap().cert_path.clone();
        let original = std::fs::read_to_string(&cert_path).unwrap();

        h.provider.issue_expiring_at(before.cert_valid_to().unwrap());
        let err = h
            .orchestrator
            .renew_domain(&before, "system-renewal")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Provider(_)));
        assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), original);
        assert_eq!(h.record(id).await.cert_valid_to(), before.cert_valid_to());
    }

    #[tokio::test]
    async fn failure_recording_then_recovery() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let record = h.record(id).await;

        h.provider.fail_next("upstream timeout");
        let err = h
            .orchestrator
            .renew_domain(&record, "system-renewal")
            .await
            .unwrap_err();
        // 续期本身不降级
        assert_eq!(h.record(id).await.domain.status, DomainStatus::Active);

        h.orchestrator
            .record_renewal_failure(id, &err, "system-renewal")
            .await
            .unwrap();
        let failed = h.record(id).await;
        assert_eq!(failed.domain.status, DomainStatus::RenewalFailed);
        assert_eq!(failed.certificate.as_ref().unwrap().renewal_attempts, 1);
        let last = events_for(&h.db, id).await.pop().unwrap();
        assert_eq!(last.event_type, EventType::RenewalFailed);
        assert!(last.message.contains("upstream timeout"));

        h.orchestrator
            .renew_domain(&failed, "system-renewal")
            .await
            .unwrap();
        let recovered = h.record(id).await;
        assert_eq!(recovered.domain.status, DomainStatus::Active);
        assert_eq!(recovered.certificate.unwrap().renewal_attempts, 0);
    }

    #[tokio::test]
    async fn renew_of_deleted_domain_is_rejected() {
        let h = harness().await;
        let id = h
            .orchestrator
            .register_domain(request("example.com"), "alice")
            .await
            .unwrap();
        let stale = h.record(id).await;
        h.orchestrator
            .delete_domain(DomainRef::Id(id), "alice")
            .await
            .unwrap();

        let err = h
            .orchestrator
            .renew_domain(&stale, "system-renewal")
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::DomainNotFound(_)));
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn get_domains_pages_by_creator() {
        let h: Harness = harness().await;
        for name in ["a.com", "b.com", "c.com"] {
            h.orchestrator
                .register_domain(request(name), "alice")
                .await
                .unwrap();
        }
        h.orchestrator
            .register_domain(request("d.com"), "bob")
            .await
            .unwrap();

        let query = ListDomainsQuery {
            page: Some(2),
            page_size: Some(2),
            ..Default::default()
        };
        let page = h.orchestrator.get_domains(&query, "alice").await.unwrap();
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.domains.len(), 1);
        assert!(page.has_prev && !page.has_next);
        assert!(page.domains[0].details.certificate_valid_to.is_some());
    }
}
