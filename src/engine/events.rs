// ==========================================
// 订单发货管理系统 - 发货单变更事件
// ==========================================
// 职责: 定义变更事件与发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Services 层的同步 worker 消费
// ==========================================

use crate::domain::shipment::ShipmentPayload;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

// ==========================================
// 变更事件
// ==========================================

/// 发货单/标签变更事件
///
/// 序列化为带 `type` 字段的 JSON，例如
/// `{"type":"TAG_ADDED","shipment_id":"S-1","name":"MOVE OVER"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentChangeEvent {
    /// 发货单新增或更新
    ShipmentUpserted { payload: ShipmentPayload },
    /// 新增标签
    TagAdded { shipment_id: String, name: String },
    /// 删除标签
    TagRemoved { shipment_id: String, name: String },
    /// 手动重算某订单
    OrderResync { order_number: String },
}

impl ShipmentChangeEvent {
    /// 事件类型标识（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            ShipmentChangeEvent::ShipmentUpserted { .. } => "ShipmentUpserted",
            ShipmentChangeEvent::TagAdded { .. } => "TagAdded",
            ShipmentChangeEvent::TagRemoved { .. } => "TagRemoved",
            ShipmentChangeEvent::OrderResync { .. } => "OrderResync",
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 发货单变更事件发布者
///
/// # 实现说明
/// - `ChannelEventPublisher` 投递到同步 worker 的 mpsc 通道
/// - `NoOpEventPublisher` 用于不需要同步的场景（如单元测试）
pub trait ShipmentEventPublisher: Send + Sync {
    /// 发布事件（不阻塞）
    fn publish(&self, event: ShipmentChangeEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ShipmentEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ShipmentChangeEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!("NoOpEventPublisher: 跳过事件发布 - event_type={}", event.kind());
        Ok(())
    }
}

/// 通道事件发布者
///
/// 通道已满或已关闭时返回错误，由调用方决定是否重发。
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<ShipmentChangeEvent>,
}

impl ChannelEventPublisher {
    pub fn new(sender: mpsc::Sender<ShipmentChangeEvent>) -> Self {
        Self { sender }
    }

    /// 接收端是否已关闭（worker 停止后为 true）
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ShipmentEventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ShipmentChangeEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let kind = event.kind();
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("ChannelEventPublisher: 通道已满 - event_type={}", kind);
                Err(format!("同步通道已满: event_type={}", kind).into())
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("ChannelEventPublisher: 通道已关闭 - event_type={}", kind);
                Err(format!("同步通道已关闭: event_type={}", kind).into())
            }
        }
    }
}
