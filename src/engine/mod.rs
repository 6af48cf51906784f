// ==========================================
// 订单发货管理系统 - 引擎层
// ==========================================
// 职责: 实现发货资格规则,不拼 SQL
// 红线: Engine 不拼 SQL, 所有规则必须输出 reason
// ==========================================

pub mod eligibility;
pub mod eligibility_core;
pub mod events;

// 重导出核心引擎
pub use eligibility::EligibilityEngine;
pub use eligibility_core::{EligibilityCore, TagIndex, MOVE_OVER_TAG};
pub use events::{
    ChannelEventPublisher, NoOpEventPublisher, ShipmentChangeEvent, ShipmentEventPublisher,
};
