use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssl_manager_common::{ManagerError, Result};

/// 签发结果；PEM 文本加上从叶子证书解析出的有效期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: String,
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl CertificateMaterial {
    /// 拒绝有效期倒置或不晚于当前证书的材料，必须在写盘之前调用
    pub fn ensure_supersedes(&self, current_valid_to: Option<DateTime<Utc>>) -> Result<()> {
        if self.valid_to <= self.valid_from {
            return Err(ManagerError::provider(format!(
                "issued certificate expires ({}) before it becomes valid ({})",
                self.valid_to, self.valid_from
            )));
        }
        if let Some(current) = current_valid_to {
            if self.valid_to <= current {
                return Err(ManagerError::provider(format!(
                    "issued certificate expires {} which is not later than the current {}",
                    self.valid_to, current
                )));
            }
        }
        Ok(())
    }
}

/// 为单个域名签发证书的外部能力
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    async fn create_certificate(&self, domain: &str) -> Result<CertificateMaterial>;
}
