//! 域名/证书/事件三类记录的事务化持久层
//!
//! 稀疏更新约定：补丁中值为 `None`、空字符串或零时间（Unix 纪元）的字段视为"不更新"，
//! 而不是"置空"。整数与布尔值只要为 `Some` 就会写入（续期成功时把尝试次数重置为 0）。
//! 所有字段都被跳过时返回 `NoFieldsToUpdate`。调用方无法通过此路径清空字段。

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Select, Set, TransactionTrait, Value,
};
use ssl_manager_common::entities::{DomainStatus, EventType, certificates, domains, events};
use ssl_manager_common::{DomainFilters, DomainRecord, ManagerError, Pagination, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub fn now_tz() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

/// 稀疏更新中可被视为"空"的值
pub trait SparseValue: Into<Value> {
    fn is_blank(&self) -> bool;
}

impl SparseValue for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl SparseValue for DateTimeWithTimeZone {
    fn is_blank(&self) -> bool {
        self.timestamp() == 0 && self.timestamp_subsec_nanos() == 0
    }
}

impl SparseValue for i32 {
    fn is_blank(&self) -> bool {
        false
    }
}

impl SparseValue for bool {
    fn is_blank(&self) -> bool {
        false
    }
}

impl SparseValue for DomainStatus {
    fn is_blank(&self) -> bool {
        false
    }
}

/// 按列收集 SET 子句
struct Assignments<C> {
    cols: Vec<(C, Value)>,
}

impl<C> Assignments<C> {
    fn new() -> Self {
        Self { cols: Vec::new() }
    }

    fn set<V: SparseValue>(mut self, col: C, value: Option<V>) -> Self {
        if let Some(value) = value.filter(|v| !v.is_blank()) {
            self.cols.push((col, value.into()));
        }
        self
    }
}

/// 可插入的记录
pub trait NewRecord {
    type Active: ActiveModelTrait + Send;
    const KIND: &'static str;

    fn into_active(self, id: Uuid, now: DateTimeWithTimeZone) -> Self::Active;
}

/// 强类型的稀疏补丁
pub trait RecordPatch {
    type Entity: EntityTrait;
    const KIND: &'static str;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn deleted_at_column() -> <Self::Entity as EntityTrait>::Column;
    fn into_assignments(self) -> Vec<(<Self::Entity as EntityTrait>::Column, Value)>;
}

#[derive(Debug, Clone)]
pub struct NewDomain {
    pub domain_name: String,
    pub status: DomainStatus,
    pub auto_renew: bool,
    pub verification_method: String,
    pub nginx_container_name: Option<String>,
    pub created_by: String,
}

impl NewRecord for NewDomain {
    type Active = domains::ActiveModel;
    const KIND: &'static str = "domains";

    fn into_active(self, id: Uuid, now: DateTimeWithTimeZone) -> Self::Active {
        domains::ActiveModel {
            id: Set(id),
            domain_name: Set(self.domain_name),
            status: Set(self.status),
            auto_renew: Set(self.auto_renew),
            verification_method: Set(self.verification_method),
            nginx_container_name: Set(self.nginx_container_name),
            created_by: Set(self.created_by),
            created_at: Set(now),
            updated_by: Set(None),
            updated_at: Set(now),
            deleted_by: Set(None),
            deleted_at: Set(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCertificate {
    pub domain_id: Uuid,
    pub issuer: String,
    pub cert_path: String,
    pub key_path: String,
    pub chain_path: Option<String>,
    pub valid_from: DateTimeWithTimeZone,
    pub valid_to: DateTimeWithTimeZone,
    pub last_renewal: Option<DateTimeWithTimeZone>,
    pub created_by: String,
}

impl NewRecord for NewCertificate {
    type Active = certificates::ActiveModel;
    const KIND: &'static str = "certificates";

    fn into_active(self, id: Uuid, now: DateTimeWithTimeZone) -> Self::Active {
        certificates::ActiveModel {
            id: Set(id),
            domain_id: Set(self.domain_id),
            issuer: Set(self.issuer),
            cert_path: Set(self.cert_path),
            key_path: Set(self.key_path),
            chain_path: Set(self.chain_path),
            valid_from: Set(self.valid_from),
            valid_to: Set(self.valid_to),
            last_renewal: Set(self.last_renewal),
            renewal_attempts: Set(0),
            created_by: Set(self.created_by),
            created_at: Set(now),
            updated_by: Set(None),
            updated_at: Set(now),
            deleted_by: Set(None),
            deleted_at: Set(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub domain_id: Uuid,
    pub event_type: EventType,
    pub message: String,
    pub created_by: String,
}

impl NewRecord for NewEvent {
    type Active = events::ActiveModel;
    const KIND: &'static str = "events";

    fn into_active(self, id: Uuid, now: DateTimeWithTimeZone) -> Self::Active {
        events::ActiveModel {
            id: Set(id),
            domain_id: Set(self.domain_id),
            event_type: Set(self.event_type),
            message: Set(self.message),
            created_by: Set(self.created_by),
            created_at: Set(now),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainPatch {
    pub status: Option<DomainStatus>,
    pub auto_renew: Option<bool>,
    pub verification_method: Option<String>,
    pub nginx_container_name: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl RecordPatch for DomainPatch {
    type Entity = domains::Entity;
    const KIND: &'static str = "domains";

    fn id_column() -> domains::Column {
        domains::Column::Id
    }

    fn deleted_at_column() -> domains::Column {
        domains::Column::DeletedAt
    }

    fn into_assignments(self) -> Vec<(domains::Column, Value)> {
        use domains::Column as C;
        Assignments::new()
            .set(C::Status, self.status)
            .set(C::AutoRenew, self.auto_renew)
            .set(C::VerificationMethod, self.verification_method)
            .set(C::NginxContainerName, self.nginx_container_name)
            .set(C::UpdatedBy, self.updated_by)
            .set(C::UpdatedAt, self.updated_at)
            .set(C::DeletedBy, self.deleted_by)
            .set(C::DeletedAt, self.deleted_at)
            .cols
    }
}

#[derive(Debug, Clone, Default)]
pub struct CertificatePatch {
    pub issuer: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub chain_path: Option<String>,
    pub valid_from: Option<DateTimeWithTimeZone>,
    pub valid_to: Option<DateTimeWithTimeZone>,
    pub last_renewal: Option<DateTimeWithTimeZone>,
    pub renewal_attempts: Option<i32>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTimeWithTimeZone>,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl RecordPatch for CertificatePatch {
    type Entity = certificates::Entity;
    const KIND: &'static str = "certificates";

    fn id_column() -> certificates::Column {
        certificates::Column::Id
    }

    fn deleted_at_column() -> certificates::Column {
        certificates::Column::DeletedAt
    }

    fn into_assignments(self) -> Vec<(certificates::Column, Value)> {
        use certificates::Column as C;
        Assignments::new()
            .set(C::Issuer, self.issuer)
            .set(C::CertPath, self.cert_path)
            .set(C::KeyPath, self.key_path)
            .set(C::ChainPath, self.chain_path)
            .set(C::ValidFrom, self.valid_from)
            .set(C::ValidTo, self.valid_to)
            .set(C::LastRenewal, self.last_renewal)
            .set(C::RenewalAttempts, self.renewal_attempts)
            .set(C::UpdatedBy, self.updated_by)
            .set(C::UpdatedAt, self.updated_at)
            .set(C::DeletedBy, self.deleted_by)
            .set(C::DeletedAt, self.deleted_at)
            .cols
    }
}

/// 共享连接池上的持久层；每个操作都有截止时间
#[derive(Clone)]
pub struct PersistenceGateway {
    db: DatabaseConnection,
    op_timeout: Duration,
}

impl PersistenceGateway {
    pub fn new(db: DatabaseConnection, op_timeout: Duration) -> Self {
        Self { db, op_timeout }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DbErr>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(ManagerError::from),
            Err(_) => Err(ManagerError::Database(DbErr::Custom(format!(
                "{} timed out after {:?}",
                op, self.op_timeout
            )))),
        }
    }

    /// 事务句柄在未提交时被丢弃会自动回滚
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.bounded("begin", self.db.begin()).await
    }

    pub async fn commit(&self, tx: DatabaseTransaction) -> Result<()> {
        self.bounded("commit", tx.commit()).await
    }

    pub async fn rollback(&self, tx: DatabaseTransaction) -> Result<()> {
        self.bounded("rollback", tx.rollback()).await
    }

    pub async fn insert_tx<N>(&self, tx: &DatabaseTransaction, record: N) -> Result<Uuid>
    where
        N: NewRecord,
        <<N::Active as ActiveModelTrait>::Entity as EntityTrait>::Model: IntoActiveModel<N::Active>,
    {
        let id = Uuid::new_v4();
        let active = record.into_active(id, now_tz());
        let insert = <<N::Active as ActiveModelTrait>::Entity as EntityTrait>::insert(active);
        self.bounded(N::KIND, insert.exec_without_returning(tx)).await?;
        Ok(id)
    }

    /// 仅更新存活行；没有匹配行时返回 `RecordNotUpdated`
    pub async fn update_tx<P: RecordPatch>(
        &self,
        tx: &DatabaseTransaction,
        id: Uuid,
        patch: P,
    ) -> Result<()> {
        let assignments = patch.into_assignments();
        if assignments.is_empty() {
            return Err(ManagerError::NoFieldsToUpdate(P::KIND));
        }

        let mut update = <P::Entity as EntityTrait>::update_many()
            .filter(P::id_column().eq(id))
            .filter(P::deleted_at_column().is_null());
        for (col, value) in assignments {
            update = update.col_expr(col, Expr::value(value));
        }

        let result = self.bounded(P::KIND, update.exec(tx)).await?;
        if result.rows_affected == 0 {
            return Err(ManagerError::Database(DbErr::RecordNotUpdated));
        }
        Ok(())
    }

    async fn find_domain_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        name: &str,
    ) -> Result<Option<Uuid>> {
        let query = domains::Entity::find()
            .select_only()
            .column(domains::Column::Id)
            .filter(domains::Column::DomainName.eq(name))
            .filter(domains::Column::DeletedAt.is_null())
            .into_tuple::<Uuid>()
            .one(conn);
        self.bounded("domains", query).await
    }

    pub async fn domain_id_by_name_tx(
        &self,
        tx: &DatabaseTransaction,
        name: &str,
    ) -> Result<Option<Uuid>> {
        self.find_domain_id(tx, name).await
    }

    pub async fn domain_id_by_name(&self, name: &str) -> Result<Option<Uuid>> {
        self.find_domain_id(&self.db, name).await
    }

    pub async fn domain_tx(
        &self,
        tx: &DatabaseTransaction,
        id: Uuid,
    ) -> Result<Option<domains::Model>> {
        let query = domains::Entity::find_by_id(id)
            .filter(domains::Column::DeletedAt.is_null())
            .one(tx);
        self.bounded("domains", query).await
    }

    async fn find_certificate<C: ConnectionTrait>(
        &self,
        conn: &C,
        domain_id: Uuid,
    ) -> Result<Option<certificates::Model>> {
        let query = certificates::Entity::find()
            .filter(certificates::Column::DomainId.eq(domain_id))
            .filter(certificates::Column::DeletedAt.is_null())
            .one(conn);
        self.bounded("certificates", query).await
    }

    pub async fn certificate_by_domain_tx(
        &self,
        tx: &DatabaseTransaction,
        domain_id: Uuid,
    ) -> Result<Option<certificates::Model>> {
        self.find_certificate(tx, domain_id).await
    }

    pub async fn certificate_by_domain(
        &self,
        domain_id: Uuid,
    ) -> Result<Option<certificates::Model>> {
        self.find_certificate(&self.db, domain_id).await
    }

    /// 存活域名及其当前证书
    pub async fn domain_record(&self, id: Uuid) -> Result<Option<DomainRecord>> {
        let query = domains::Entity::find_by_id(id)
            .filter(domains::Column::DeletedAt.is_null())
            .one(&self.db);
        let Some(domain) = self.bounded("domains", query).await? else {
            return Ok(None);
        };
        let certificate = self.certificate_by_domain(id).await?;
        Ok(Some(DomainRecord {
            domain,
            certificate,
        }))
    }

    pub async fn domain_exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.domain_id_by_name(name).await?.is_some())
    }

    pub async fn domains_count(&self, filters: &DomainFilters) -> Result<u64> {
        self.bounded("domains", filtered(filters).count(&self.db)).await
    }

    /// `pagination` 为空时全量返回（调度器扫描）
    pub async fn domains_list(
        &self,
        filters: &DomainFilters,
        pagination: Option<Pagination>,
    ) -> Result<Vec<DomainRecord>> {
        let mut query = filtered(filters)
            .order_by_desc(domains::Column::CreatedAt)
            .order_by_asc(domains::Column::DomainName);
        if let Some(page) = pagination {
            query = query.limit(page.limit).offset(page.offset);
        }
        let domains = self.bounded("domains", query.all(&self.db)).await?;
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = domains.iter().map(|d| d.id).collect();
        let certs = certificates::Entity::find()
            .filter(certificates::Column::DomainId.is_in(ids))
            .filter(certificates::Column::DeletedAt.is_null())
            .all(&self.db);
        let mut by_domain: HashMap<Uuid, certificates::Model> = self
            .bounded("certificates", certs)
            .await?
            .into_iter()
            .map(|cert| (cert.domain_id, cert))
            .collect();

        Ok(domains
            .into_iter()
            .map(|domain| {
                let certificate = by_domain.remove(&domain.id);
                DomainRecord {
                    domain,
                    certificate,
                }
            })
            .collect())
    }
}

fn filtered(filters: &DomainFilters) -> Select<domains::Entity> {
    let mut query = domains::Entity::find().filter(domains::Column::DeletedAt.is_null());
    if let Some(name) = &filters.domain_name {
        query = query.filter(lower_like(domains::Column::DomainName, name));
    }
    if let Some(status) = &filters.status {
        query = query.filter(lower_like(domains::Column::Status, status));
    }
    if let Some(creator) = &filters.created_by {
        query = query.filter(domains::Column::CreatedBy.eq(creator.as_str()));
    }
    query
}

fn lower_like(col: domains::Column, needle: &str) -> sea_orm::sea_query::SimpleExpr {
    Expr::expr(Func::lower(Expr::col((domains::Entity, col))))
        .like(format!("%{}%", needle.to_lowercase()))
}
