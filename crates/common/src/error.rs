//! SSL Manager 统一错误类型定义
//!
//! 全项目共享一个错误类型，编排器、持久化层与 HTTP 层使用同一套分类。

use crate::entities::DomainStatus;
use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum ManagerError {
    /// 输入校验失败 (400)
    #[error("validation failed: {0}")]
    Validation(String),

    /// 缺少调用方身份 (401)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 域名已存在 (409)
    #[error("domain already exists: {0}")]
    DomainExists(String),

    /// 域名不存在或已删除 (404)
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// 非法状态迁移 (409)
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: DomainStatus, to: DomainStatus },

    /// 证书签发失败 (502)
    #[error("certificate provider failed: {0}")]
    Provider(String),

    /// 数据库错误 (500)
    #[error("persistence failure: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// 稀疏更新中没有可写字段 (500)
    #[error("no fields to update on {0}")]
    NoFieldsToUpdate(&'static str),

    /// 证书已续期但反向代理重载失败，属于部分成功 (500)
    #[error("certificate renewed but reload failed: {0}")]
    Reload(String),

    /// IO 错误 (500)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误 (500)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 其他内部错误 (500)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ManagerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(domain: impl Into<String>) -> Self {
        Self::DomainNotFound(domain.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }

    /// 判断是否为客户端错误（4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Unauthorized(_)
                | Self::DomainExists(_)
                | Self::DomainNotFound(_)
                | Self::InvalidTransition { .. }
        )
    }

    /// 判断是否为服务端错误（5xx）
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// 证书已落盘并提交，仅重载失败
    pub fn is_partial_success(&self) -> bool {
        matches!(self, Self::Reload(_))
    }

    /// 唯一索引冲突（插入重复的存活域名）
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err.sql_err(),
                Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
            ),
            _ => false,
        }
    }

    /// 获取 HTTP 状态码
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::DomainNotFound(_) => 404,
            Self::DomainExists(_) | Self::InvalidTransition { .. } => 409,
            Self::Provider(_) => 502,
            _ => 500,
        }
    }

    /// 获取 HTTP 状态码（axum 类型）
    #[cfg(feature = "http")]
    pub fn axum_status_code(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::from_u16(self.http_status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ManagerError>;

// ============ Axum HTTP 响应支持 ============

#[cfg(feature = "http")]
mod axum_impl {
    use super::*;
    use axum::{
        Json,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    impl IntoResponse for ManagerError {
        fn into_response(self) -> Response {
            let status = self.axum_status_code();

            // 客户端错误记 info，外部依赖记 warn，其余记 error
            match &self {
                ManagerError::Validation(_)
                | ManagerError::Unauthorized(_)
                | ManagerError::DomainExists(_)
                | ManagerError::DomainNotFound(_)
                | ManagerError::InvalidTransition { .. } => {
                    tracing::info!(status = status.as_u16(), reason = %self, "Request rejected");
                }
                ManagerError::Provider(msg) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        provider_error = %msg,
                        "Certificate provider failed"
                    );
                }
                ManagerError::Reload(msg) => {
                    tracing::warn!(
                        status = status.as_u16(),
                        reload_error = %msg,
                        "Reverse proxy reload failed"
                    );
                }
                ManagerError::Database(db_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        error = %db_err,
                        "Database operation failed"
                    );
                }
                ManagerError::Internal(internal_err) => {
                    tracing::error!(
                        status = status.as_u16(),
                        internal_error = ?internal_err,
                        "Internal server error"
                    );
                }
                other => {
                    tracing::error!(status = status.as_u16(), error = %other, "Request failed");
                }
            }

            let body = Json(json!({"error": self.to_string()}));
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_err() -> ManagerError {
        ManagerError::Database(sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "test".to_string(),
        )))
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(ManagerError::validation("bad").http_status_code(), 400);
        assert_eq!(
            ManagerError::Unauthorized("missing".to_string()).http_status_code(),
            401
        );
        assert_eq!(ManagerError::not_found("a.com").http_status_code(), 404);
        assert_eq!(
            ManagerError::DomainExists("a.com".to_string()).http_status_code(),
            409
        );
        assert_eq!(
            ManagerError::InvalidTransition {
                from: DomainStatus::Deleted,
                to: DomainStatus::Active,
            }
            .http_status_code(),
            409
        );
        assert_eq!(ManagerError::provider("rate limited").http_status_code(), 502);
        assert_eq!(db_err().http_status_code(), 500);
        assert_eq!(ManagerError::reload("exit 1").http_status_code(), 500);
        assert_eq!(
            ManagerError::NoFieldsToUpdate("domains").http_status_code(),
            500
        );
    }

    #[test]
    fn test_constructors_and_messages() {
        let err = ManagerError::not_found("example.com");
        assert!(matches!(err, ManagerError::DomainNotFound(_)));
        assert_eq!(err.to_string(), "domain not found: example.com");

        let err = ManagerError::reload("container missing");
        assert!(err.is_partial_success());
        assert_eq!(
            err.to_string(),
            "certificate renewed but reload failed: container missing"
        );

        let err = ManagerError::InvalidTransition {
            from: DomainStatus::Deleted,
            to: DomainStatus::Active,
        };
        assert_eq!(err.to_string(), "invalid status transition deleted -> active");
    }

    #[test]
    fn test_error_classification() {
        assert!(ManagerError::validation("x").is_client_error());
        assert!(ManagerError::DomainExists("x".to_string()).is_client_error());
        assert!(ManagerError::not_found("x").is_client_error());
        assert!(!ManagerError::provider("x").is_client_error());
        assert!(db_err().is_server_error());
        assert!(ManagerError::reload("x").is_server_error());
        assert!(!ManagerError::provider("x").is_partial_success());
    }

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!ManagerError::DomainExists("a.com".to_string()).is_unique_violation());
        assert!(!db_err().is_unique_violation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: ManagerError = io_err.into();
        assert!(matches!(err, ManagerError::Io(_)));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_anyhow_error_conversion() {
        let err: ManagerError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(err, ManagerError::Internal(_)));
        assert!(err.to_string().contains("something went wrong"));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_axum_status_code() {
        use axum::http::StatusCode;

        assert_eq!(
            ManagerError::DomainExists("a.com".to_string()).axum_status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ManagerError::provider("down").axum_status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(db_err().axum_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
