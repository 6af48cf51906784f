// ==========================================
// 订单发货管理系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 订单发货资格判定（哪些发货单现在可以发）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 同步校验接口
pub mod api;

// 服务层 - 缓存刷新与变更同步
pub mod services;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EligibilityClassification, ExclusionReason, SelectionPath, ShipmentStatus};

// 领域实体
pub use domain::{
    EligibilityResult, EligibilitySnapshot, OrderShipments, Shipment, ShipmentPayload,
    ShipmentTag,
};

// 引擎
pub use engine::{EligibilityCore, EligibilityEngine, ShipmentChangeEvent, MOVE_OVER_TAG};

// API
pub use api::{ApiError, ShipmentApi};

// 服务
pub use services::{EligibilityCacheRefreshService, RefreshTrigger, ShipmentSyncWorker};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "订单发货管理系统";
