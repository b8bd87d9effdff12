use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 审计事件类型；事件只追加，不更新也不删除
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "renewed")]
    Renewed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "renewal_failed")]
    RenewalFailed,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub domain_id: Uuid,
    pub event_type: EventType,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub created_by: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Domain,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Self::Domain => Entity::belongs_to(super::domains::Entity)
                .from(Column::DomainId)
                .to(super::domains::Column::Id)
                .into(),
        }
    }
}

impl Related<super::domains::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Domain.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
