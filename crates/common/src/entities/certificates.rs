use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub domain_id: Uuid,
    pub issuer: String,
    pub cert_path: String,
    pub key_path: String,
    pub chain_path: Option<String>,
    pub valid_from: DateTimeWithTimeZone,
    pub valid_to: DateTimeWithTimeZone,
    pub last_renewal: Option<DateTimeWithTimeZone>,
    pub renewal_attempts: i32,
    pub created_by: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_by: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTimeWithTimeZone>,
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
