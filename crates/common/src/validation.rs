//! 域名与注册请求校验
//!
//! 校验在任何持久化之前执行，失败的请求不会留下任何数据。

use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_VERIFICATION_METHOD: &str = "http-01";
const SUPPORTED_VERIFICATION_METHODS: &[&str] = &["http-01", "dns-01"];
const MAX_DOMAIN_LEN: usize = 253;

/// 校验错误类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 空域名
    EmptyDomain,

    /// 域名总长度超过 253
    DomainTooLong { len: usize },

    /// 域名格式非法
    MalformedDomain { domain: String },

    /// 标签以连字符开头或结尾
    HyphenatedLabel { label: String },

    /// 不支持的验证方式
    UnsupportedVerificationMethod { method: String },

    /// 删除请求既没有 id 也没有名称
    MissingDomainReference,
}

impl ValidationError {
    /// 获取错误的详细描述
    pub fn description(&self) -> String {
        match self {
            Self::EmptyDomain => "domain name is empty".to_string(),
            Self::DomainTooLong { len } => {
                format!("domain name is {} characters (max {})", len, MAX_DOMAIN_LEN)
            }
            Self::MalformedDomain { domain } => format!("malformed domain name {}", domain),
            Self::HyphenatedLabel { label } => {
                format!("label {} must not start or end with '-'", label)
            }
            Self::UnsupportedVerificationMethod { method } => format!(
                "unsupported verification method {} (expected one of {})",
                method,
                SUPPORTED_VERIFICATION_METHODS.join(", ")
            ),
            Self::MissingDomainReference => "missing domain_id or domain_name".to_string(),
        }
    }
}

impl From<ValidationError> for crate::error::ManagerError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.description())
    }
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9-]{1,63}(?:\.[a-z0-9-]{1,63})*$").expect("domain regex is valid")
    })
}

/// 规范化并校验域名，返回小写形式
pub fn normalize_domain_name(raw: &str) -> Result<String, ValidationError> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return Err(ValidationError::EmptyDomain);
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(ValidationError::DomainTooLong { len: domain.len() });
    }
    if !domain_regex().is_match(&domain) {
        return Err(ValidationError::MalformedDomain { domain });
    }
    if let Some(label) = domain
        .split('.')
        .find(|label| label.starts_with('-') || label.ends_with('-'))
    {
        return Err(ValidationError::HyphenatedLabel {
            label: label.to_string(),
        });
    }
    Ok(domain)
}

/// 校验验证方式，空值取默认 `http-01`
pub fn normalize_verification_method(raw: Option<&str>) -> Result<String, ValidationError> {
    let method = raw
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_VERIFICATION_METHOD.to_string());
    if SUPPORTED_VERIFICATION_METHODS.contains(&method.as_str()) {
        Ok(method)
    } else {
        Err(ValidationError::UnsupportedVerificationMethod { method })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_domains() {
        assert_eq!(normalize_domain_name("example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain_name("  API.Example.COM ").unwrap(), "api.example.com");
        assert_eq!(normalize_domain_name("example.com.").unwrap(), "example.com");
        assert_eq!(normalize_domain_name("localhost").unwrap(), "localhost");
        assert_eq!(normalize_domain_name("xn--bcher-kva.de").unwrap(), "xn--bcher-kva.de");
    }

    #[test]
    fn test_rejects_empty_and_long() {
        assert_eq!(normalize_domain_name("   "), Err(ValidationError::EmptyDomain));

        let label = "a".repeat(63);
        let long = [label.as_str(); 5].join(".");
        assert!(matches!(
            normalize_domain_name(&long),
            Err(ValidationError::DomainTooLong { len: 319 })
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["exa mple.com", "example..com", "*.example.com", "ex_ample.com", "a/b"] {
            assert!(
                matches!(
                    normalize_domain_name(bad),
                    Err(ValidationError::MalformedDomain { .. })
                ),
                "{bad} should be malformed"
            );
        }
        let label = "a".repeat(64);
        assert!(normalize_domain_name(&format!("{label}.com")).is_err());
    }

    #[test]
    fn test_rejects_hyphen_edges() {
        assert_eq!(
            normalize_domain_name("-bad.example.com"),
            Err(ValidationError::HyphenatedLabel {
                label: "-bad".to_string()
            })
        );
        assert!(normalize_domain_name("bad-.example.com").is_err());
        assert!(normalize_domain_name("good-label.example.com").is_ok());
    }

    #[test]
    fn test_verification_method() {
        assert_eq!(normalize_verification_method(None).unwrap(), "http-01");
        assert_eq!(normalize_verification_method(Some("")).unwrap(), "http-01");
        assert_eq!(normalize_verification_method(Some("DNS-01")).unwrap(), "dns-01");
        let err = normalize_verification_method(Some("email")).unwrap_err();
        assert!(err.description().contains("unsupported verification method email"));
    }

    #[test]
    fn test_validation_error_into_manager_error() {
        let err: crate::error::ManagerError = ValidationError::EmptyDomain.into();
        assert_eq!(err.to_string(), "validation failed: domain name is empty");
    }
}
