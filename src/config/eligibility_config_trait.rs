// ==========================================
// 订单发货管理系统 - 资格刷新配置读取 Trait
// ==========================================
// 职责: 定义缓存刷新与同步 worker 所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use std::error::Error;

// ==========================================
// EligibilityConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait EligibilityConfigReader: Send + Sync {
    /// 获取定时全量刷新间隔（秒）
    ///
    /// # 默认值
    /// - 300
    async fn get_refresh_interval_secs(&self) -> Result<u64, Box<dyn Error + Send + Sync>>;

    /// 获取全量刷新时每批评估的订单数
    ///
    /// # 默认值
    /// - 500
    async fn get_refresh_chunk_size(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 获取刷新日志保留天数（全量刷新时清理更早的日志）
    ///
    /// # 默认值
    /// - 7
    async fn get_refresh_log_retention_days(&self) -> Result<u32, Box<dyn Error + Send + Sync>>;

    /// 获取同步事件通道容量
    ///
    /// # 默认值
    /// - 1024
    async fn get_sync_channel_capacity(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    /// 获取单个事件处理失败后的最大重试次数
    ///
    /// # 默认值
    /// - 3
    async fn get_sync_max_retries(&self) -> Result<u32, Box<dyn Error + Send + Sync>>;
}
