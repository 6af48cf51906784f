// ==========================================
// 订单发货管理系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod eligibility;
pub mod shipment;
pub mod types;

// 重导出核心类型
pub use eligibility::{EligibilityResult, EligibilitySnapshot};
pub use shipment::{OrderShipments, Shipment, ShipmentPayload, ShipmentTag};
pub use types::{EligibilityClassification, ExclusionReason, SelectionPath, ShipmentStatus};
