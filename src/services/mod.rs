// ==========================================
// 订单发货管理系统 - 服务层
// ==========================================
// 职责: 资格缓存刷新、变更同步
// ==========================================

pub mod cache_refresh;
pub mod sync_worker;

pub use cache_refresh::{EligibilityCacheRefreshService, RefreshSummary, RefreshTrigger};
pub use sync_worker::{ShipmentSyncWorker, SyncWorkerStats};
