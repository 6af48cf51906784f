// ==========================================
// 订单发货管理系统 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod eligibility_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, defaults, get_default_db_path, ConfigManager};
pub use eligibility_config_trait::EligibilityConfigReader;
