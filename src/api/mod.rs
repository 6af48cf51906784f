// ==========================================
// 订单发货管理系统 - API 层
// ==========================================
// 职责: 提供同步业务 API 接口
// ==========================================

pub mod error;
pub mod shipment_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use shipment_api::{OrderEligibilityResponse, ShipmentApi, ShipmentEligibilityView};
