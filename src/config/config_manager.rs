// ==========================================
// 订单发货管理系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::eligibility_config_trait::EligibilityConfigReader;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置（存在则覆盖）
    pub fn set_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 读取并解析数值配置，解析失败或非正数时回退默认值
    fn get_positive_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + PartialOrd + Default + Copy + ToString,
    {
        let value = self.get_config_or_default(key, &default.to_string())?;
        match value.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %value,
                    fallback = %default.to_string(),
                    "配置值无效，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

// ==========================================
// EligibilityConfigReader Trait 实现
// ==========================================
#[async_trait]
impl EligibilityConfigReader for ConfigManager {
    async fn get_refresh_interval_secs(&self) -> ConfigResult<u64> {
        self.get_positive_or_default(config_keys::REFRESH_INTERVAL_SECS, defaults::REFRESH_INTERVAL_SECS)
    }

    async fn get_refresh_chunk_size(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(config_keys::REFRESH_CHUNK_SIZE, defaults::REFRESH_CHUNK_SIZE)
    }

    async fn get_refresh_log_retention_days(&self) -> ConfigResult<u32> {
        self.get_positive_or_default(
            config_keys::REFRESH_LOG_RETENTION_DAYS,
            defaults::REFRESH_LOG_RETENTION_DAYS,
        )
    }

    async fn get_sync_channel_capacity(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(config_keys::SYNC_CHANNEL_CAPACITY, defaults::SYNC_CHANNEL_CAPACITY)
    }

    async fn get_sync_max_retries(&self) -> ConfigResult<u32> {
        // 0 是合法值（不重试）
        let value = self.get_config_or_default(
            config_keys::SYNC_MAX_RETRIES,
            &defaults::SYNC_MAX_RETRIES.to_string(),
        )?;
        Ok(value.trim().parse::<u32>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::SYNC_MAX_RETRIES,
                raw_value = %value,
                "重试次数配置格式错误，使用默认值"
            );
            defaults::SYNC_MAX_RETRIES
        }))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 缓存刷新
    pub const REFRESH_INTERVAL_SECS: &str = "eligibility_refresh_interval_secs";
    pub const REFRESH_CHUNK_SIZE: &str = "eligibility_refresh_chunk_size";
    pub const REFRESH_LOG_RETENTION_DAYS: &str = "eligibility_refresh_log_retention_days";

    // 同步 worker
    pub const SYNC_CHANNEL_CAPACITY: &str = "shipment_sync_channel_capacity";
    pub const SYNC_MAX_RETRIES: &str = "shipment_sync_max_retries";
}

pub mod defaults {
    pub const REFRESH_INTERVAL_SECS: u64 = 300;
    pub const REFRESH_CHUNK_SIZE: usize = 500;
    pub const REFRESH_LOG_RETENTION_DAYS: u32 = 7;
    pub const SYNC_CHANNEL_CAPACITY: usize = 1024;
    pub const SYNC_MAX_RETRIES: u32 = 3;
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 SHIPPING_OPS_DB_PATH（非空时）
/// - 否则: 用户数据目录/shipping-ops/shipping_ops.db
/// - 无用户数据目录时: ./shipping_ops.db
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("SHIPPING_OPS_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./shipping_ops.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("shipping-ops");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("shipping_ops.db");
        }
    }

    path.to_string_lossy().to_string()
}
