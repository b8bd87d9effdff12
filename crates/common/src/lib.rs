pub mod config;
pub mod entities;
pub mod error;
pub mod models;
pub mod validation;

// ============ 重新导出常用类型 ============

// 错误处理
pub use error::{ManagerError, Result};

// 配置相关
pub use config::{AppConfig, DatabaseConfig};

// 实体枚举
pub use entities::{DomainStatus, EventType};

// 验证相关
pub use validation::{ValidationError, normalize_domain_name, normalize_verification_method};

// 请求/响应模型
pub use models::{DomainFilters, DomainPage, DomainRecord, DomainRef, Pagination};
