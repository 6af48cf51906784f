// ==========================================
// 订单发货管理系统 - 发货单领域模型
// ==========================================
// 职责: 发货单、发货标签、订单聚合、上游载荷
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

use crate::domain::types::ShipmentStatus;
use serde::{Deserialize, Serialize};

// ==========================================
// Shipment - 发货单（引擎所需的最小投影）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,                               // 发货单ID（生命周期内稳定）
    pub shipment_status: Option<ShipmentStatus>,  // 发货状态（缺失视为非暂扣）
    pub tracking_number: Option<String>,          // 运单号（非空表示已发出）
}

impl Shipment {
    pub fn new(
        id: impl Into<String>,
        shipment_status: Option<ShipmentStatus>,
        tracking_number: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            shipment_status,
            tracking_number,
        }
    }

    /// 是否已有非空运单号
    pub fn has_tracking_number(&self) -> bool {
        self.tracking_number
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// 是否处于暂扣状态
    pub fn is_on_hold(&self) -> bool {
        self.shipment_status
            .as_ref()
            .map(ShipmentStatus::is_on_hold)
            .unwrap_or(false)
    }
}

// ==========================================
// ShipmentTag - 发货标签
// ==========================================
// 仅通过 shipment_id 外键查找，不拥有发货单
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShipmentTag {
    pub shipment_id: String,
    pub name: String,
}

impl ShipmentTag {
    pub fn new(shipment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            name: name.into(),
        }
    }
}

// ==========================================
// OrderShipments - 单个订单的发货单与标签
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipments {
    pub order_number: String,
    pub shipments: Vec<Shipment>,
    pub tags: Vec<ShipmentTag>,
}

impl OrderShipments {
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            order_number: order_number.into(),
            shipments: Vec::new(),
            tags: Vec::new(),
        }
    }
}

// ==========================================
// ShipmentPayload - 上游发货单变更载荷
// ==========================================
// 所有字段可空，未知字段忽略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentPayload {
    pub shipment_id: Option<String>,
    pub order_number: Option<String>,
    pub shipment_status: Option<String>,
    pub tracking_number: Option<String>,
}

impl ShipmentPayload {
    /// 转换为领域发货单
    ///
    /// # 返回
    /// - None: shipment_id 缺失或为空
    pub fn to_shipment(&self) -> Option<Shipment> {
        let id = self
            .shipment_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let shipment_status = self
            .shipment_status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(ShipmentStatus::parse);

        Some(Shipment::new(id, shipment_status, self.tracking_number.clone()))
    }

    /// 订单号（去空白，空串视为缺失）
    pub fn order_number(&self) -> Option<&str> {
        self.order_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_number_empty_string_is_absent() {
        let s = Shipment::new("A", None, Some(String::new()));
        assert!(!s.has_tracking_number());

        let s = Shipment::new("A", None, Some("1Z123".to_string()));
        assert!(s.has_tracking_number());
    }

    #[test]
    fn test_missing_status_is_not_on_hold() {
        let s = Shipment::new("A", None, None);
        assert!(!s.is_on_hold());
    }

    #[test]
    fn test_payload_with_missing_fields() {
        let payload: ShipmentPayload = serde_json::from_str(
            r#"{"shipmentId":"S-1","orderNumber":"  100-1 ","carrier":"ups"}"#,
        )
        .unwrap();

        let shipment = payload.to_shipment().unwrap();
        assert_eq!(shipment.id, "S-1");
        assert!(shipment.shipment_status.is_none());
        assert!(shipment.tracking_number.is_none());
        assert_eq!(payload.order_number(), Some("100-1"));
    }

    #[test]
    fn test_payload_without_id_is_rejected() {
        let payload: ShipmentPayload =
            serde_json::from_str(r#"{"shipmentId":"  ","shipmentStatus":"on_hold"}"#).unwrap();
        assert!(payload.to_shipment().is_none());

        let payload: ShipmentPayload = serde_json::from_str(r#"{"shipmentId":null}"#).unwrap();
        assert!(payload.to_shipment().is_none());
    }

    #[test]
    fn test_payload_status_mapping() {
        let payload: ShipmentPayload = serde_json::from_str(
            r#"{"shipmentId":"S-2","shipmentStatus":"on_hold","trackingNumber":null}"#,
        )
        .unwrap();
        let shipment = payload.to_shipment().unwrap();
        assert!(shipment.is_on_hold());
    }
}
