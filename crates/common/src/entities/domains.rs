use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 域名生命周期状态
///
/// 状态只能向前推进，`deleted` 为终态。
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "renewal_failed")]
    RenewalFailed,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::RenewalFailed => "renewal_failed",
            Self::Deleted => "deleted",
        }
    }

    /// 状态机校验；相同状态的写入视为合法（例如续期成功后保持 `active`）
    pub fn can_transition_to(&self, next: DomainStatus) -> bool {
        use DomainStatus::*;
        if *self == next {
            return *self != Deleted;
        }
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, RenewalFailed)
                | (Pending, Deleted)
                | (Active, RenewalFailed)
                | (Active, Deleted)
                | (RenewalFailed, Active)
                | (RenewalFailed, Deleted)
        )
    }
}

impl std::fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "domains")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub domain_name: String,
    pub status: DomainStatus,
    pub auto_renew: bool,
    pub verification_method: String,
    pub nginx_container_name: Option<String>,
    pub created_by: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_by: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Certificates,
    Events,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Certificates => Entity::has_many(super::certificates::Entity).into(),
            Self::Events => Entity::has_many(super::events::Entity).into(),
        }
    }
}

impl Related<super::certificates::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Certificates.def()
    }
}

impl Related<super::events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Events.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
