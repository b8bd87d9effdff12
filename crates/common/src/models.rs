use crate::entities::{DomainStatus, certificates, domains};
use crate::validation::{ValidationError, normalize_domain_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;
/// 偏移量需落在数据库有符号 64 位整数范围内
pub const MAX_PAGE: u64 = i64::MAX as u64 / MAX_PAGE_SIZE;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomainRequest {
    pub domain: String,
    pub verification_method: Option<String>,
    #[serde(default = "default_true")]
    pub auto_renew: bool,
    pub nginx_container_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteDomainQuery {
    pub domain_id: Option<Uuid>,
    pub domain_name: Option<String>,
}

impl DeleteDomainQuery {
    /// id 优先于名称
    pub fn target(&self) -> Result<DomainRef, ValidationError> {
        if let Some(id) = self.domain_id {
            return Ok(DomainRef::Id(id));
        }
        match self.domain_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(DomainRef::Name(normalize_domain_name(name)?)),
            _ => Err(ValidationError::MissingDomainReference),
        }
    }
}

/// 按 id 或名称定位一个存活域名
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRef {
    Id(Uuid),
    Name(String),
}

impl fmt::Display for DomainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDomainsQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub status: Option<String>,
    pub domain_name: Option<String>,
}

impl ListDomainsQuery {
    pub fn page(&self) -> u64 {
        self.page.filter(|p| *p > 0).unwrap_or(1).min(MAX_PAGE)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    pub fn filters(&self, created_by: &str) -> DomainFilters {
        DomainFilters {
            domain_name: non_blank(self.domain_name.as_deref()),
            status: non_blank(self.status.as_deref()),
            created_by: non_blank(Some(created_by)),
        }
    }

    pub fn pagination(&self) -> Pagination {
        let limit = self.page_size();
        Pagination {
            limit,
            offset: (self.page() - 1).saturating_mul(limit),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 列表过滤条件；全部为空时返回所有未删除域名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainFilters {
    /// 域名子串（不区分大小写）
    pub domain_name: Option<String>,
    /// 状态子串（不区分大小写）
    pub status: Option<String>,
    /// 创建者精确匹配
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

/// 域名及其当前证书
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain: domains::Model,
    pub certificate: Option<certificates::Model>,
}

impl DomainRecord {
    pub fn id(&self) -> Uuid {
        self.domain.id
    }

    pub fn name(&self) -> &str {
        &self.domain.domain_name
    }

    pub fn cert_valid_to(&self) -> Option<DateTime<Utc>> {
        self.certificate
            .as_ref()
            .map(|c| c.valid_to.with_timezone(&Utc))
    }

    pub fn reload_target(&self) -> Option<&str> {
        self.domain
            .nginx_container_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    pub fn summary(&self) -> DomainSummary {
        let cert = self.certificate.as_ref();
        DomainSummary {
            id: self.domain.id,
            domain_name: self.domain.domain_name.clone(),
            details: DomainDetails {
                status: self.domain.status,
                auto_renew: self.domain.auto_renew,
                verification_method: self.domain.verification_method.clone(),
                created_at: self.domain.created_at.with_timezone(&Utc),
                created_by: self.domain.created_by.clone(),
                domain_last_update: self.domain.updated_at.with_timezone(&Utc),
                nginx_container_name: self.domain.nginx_container_name.clone(),
                certificate_valid_to: self.cert_valid_to(),
                certificate_last_renewal: cert
                    .and_then(|c| c.last_renewal)
                    .map(|t| t.with_timezone(&Utc)),
                certificate_renewal_attempts: cert.map(|c| c.renewal_attempts).unwrap_or(0),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub id: Uuid,
    pub domain_name: String,
    pub details: DomainDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDetails {
    pub status: DomainStatus,
    pub auto_renew: bool,
    pub verification_method: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub domain_last_update: DateTime<Utc>,
    pub nginx_container_name: Option<String>,
    pub certificate_valid_to: Option<DateTime<Utc>>,
    pub certificate_last_renewal: Option<DateTime<Utc>>,
    pub certificate_renewal_attempts: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPage {
    pub total_pages: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_elements: u64,
    pub has_next: bool,
    pub has_prev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_page: Option<u64>,
    pub domains: Vec<DomainSummary>,
}

impl DomainPage {
    pub fn new(total_elements: u64, page: u64, page_size: u64, domains: Vec<DomainSummary>) -> Self {
        let page_size = page_size.max(1);
        let total_pages = total_elements.div_ceil(page_size);
        let has_next = page < total_pages;
        let has_prev = page > 1;
        Self {
            total_pages,
            page,
            page_size,
            total_elements,
            has_next,
            has_prev,
            next_page: has_next.then_some(page + 1),
            prev_page: has_prev.then_some(page - 1),
            domains,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomainResponse {
    pub message: String,
    pub domain_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_math() {
        let page = DomainPage::new(25, 2, 10, Vec::new());
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(page.has_prev);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.prev_page, Some(1));

        let last = DomainPage::new(20, 2, 10, Vec::new());
        assert_eq!(last.total_pages, 2);
        assert!(!last.has_next);
        assert_eq!(last.next_page, None);

        let empty = DomainPage::new(0, 1, 10, Vec::new());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next && !empty.has_prev);
    }

    #[test]
    fn list_query_defaults_and_bounds() {
        let query = ListDomainsQuery::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(query.pagination(), Pagination { limit: 10, offset: 0 });

        let query = ListDomainsQuery {
            page: Some(3),
            page_size: Some(500),
            status: Some("  ".to_string()),
            domain_name: Some("Example".to_string()),
        };
        assert_eq!(query.pagination(), Pagination { limit: 100, offset: 200 });
        let filters = query.filters("alice");
        assert_eq!(filters.status, None);
        assert_eq!(filters.domain_name.as_deref(), Some("Example"));
        assert_eq!(filters.created_by.as_deref(), Some("alice"));
    }

    #[test]
    fn delete_target_prefers_id() {
        let id = Uuid::new_v4();
        let query = DeleteDomainQuery {
            domain_id: Some(id),
            domain_name: Some("a.com".to_string()),
        };
        assert_eq!(query.target().unwrap(), DomainRef::Id(id));

        let query = DeleteDomainQuery {
            domain_id: None,
            domain_name: Some(" A.com ".to_string()),
        };
        assert_eq!(query.target().unwrap(), DomainRef::Name("a.com".to_string()));

        assert_eq!(
            DeleteDomainQuery::default().target(),
            Err(ValidationError::MissingDomainReference)
        );
    }

    #[test]
    fn delete_target_matches_registered_spelling() {
        let query = DeleteDomainQuery {
            domain_id: None,
            domain_name: Some("Example.com.".to_string()),
        };
        assert_eq!(query.target().unwrap(), DomainRef::Name("example.com".to_string()));

        let query = DeleteDomainQuery {
            domain_id: None,
            domain_name: Some("bad_host!".to_string()),
        };
        assert!(matches!(
            query.target(),
            Err(ValidationError::MalformedDomain { .. })
        ));
    }

    #[test]
    fn huge_page_does_not_overflow() {
        let query = ListDomainsQuery {
            page: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(query.page(), MAX_PAGE);
        let pagination = query.pagination();
        assert_eq!(pagination.limit, DEFAULT_PAGE_SIZE);
        assert!(pagination.offset <= i64::MAX as u64);

        let query = ListDomainsQuery {
            page: Some(u64::MAX),
            page_size: Some(MAX_PAGE_SIZE),
            ..Default::default()
        };
        assert!(query.pagination().offset <= i64::MAX as u64);
    }

    #[test]
    fn create_request_defaults_auto_renew() {
        let req: CreateDomainRequest = serde_json::from_str(r#"{"domain":"a.com"}"#).unwrap();
        assert!(req.auto_renew);
        assert!(req.verification_method.is_none());
    }
}
