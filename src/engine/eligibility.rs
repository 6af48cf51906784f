// ==========================================
// 订单发货管理系统 - 发货资格引擎
// ==========================================
// 职责: 包装 EligibilityCore，提供订单级/批量判定与日志
// 输入: OrderShipments（调用方预先从仓储加载）
// 输出: EligibilitySnapshot（可持久化快照）
// ==========================================
// 红线: 不直接读写库,只计算和返回结果
// ==========================================

use crate::domain::eligibility::EligibilitySnapshot;
use crate::domain::shipment::OrderShipments;
use crate::engine::EligibilityCore;
use tracing::instrument;

// ==========================================
// EligibilityEngine - 发货资格引擎
// ==========================================
// 无实例状态；各调用方各自持有实例，不共享运行时单例
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityEngine;

impl EligibilityEngine {
    /// 创建新的 EligibilityEngine 实例
    pub fn new() -> Self {
        Self
    }

    /// 评估单个订单
    ///
    /// # 参数
    /// - order: 订单的发货单与标签
    ///
    /// # 返回
    /// - (EligibilitySnapshot, Vec<String>): 判定快照和逐单原因
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub fn evaluate_order(&self, order: &OrderShipments) -> (EligibilitySnapshot, Vec<String>) {
        let result = EligibilityCore::resolve(&order.shipments, &order.tags);
        let reasons = EligibilityCore::explain(&order.shipments, &order.tags);

        tracing::debug!(
            classification = %result.classification,
            selection_path = %result.selection_path,
            shippable = result.shippable_shipments.len(),
            total = order.shipments.len(),
            "订单发货资格判定完成"
        );

        (result.to_snapshot(&order.order_number), reasons)
    }

    /// 批量评估多个订单
    ///
    /// 所有订单的标签合并构建一次索引（shipment_id 全局唯一），
    /// 之后每个发货单 O(1) 查询。
    ///
    /// # 返回
    /// - Vec<EligibilitySnapshot>: 与输入订单顺序一致
    #[instrument(skip(self, orders), fields(order_count = orders.len()))]
    pub fn evaluate_batch(&self, orders: &[OrderShipments]) -> Vec<EligibilitySnapshot> {
        let index = EligibilityCore::build_tag_index(orders.iter().flat_map(|o| o.tags.iter()));

        let snapshots: Vec<EligibilitySnapshot> = orders
            .iter()
            .map(|order| {
                EligibilityCore::resolve_with_index(&order.shipments, &index)
                    .to_snapshot(&order.order_number)
            })
            .collect();

        tracing::debug!(
            tagged_shipments = index.len(),
            snapshots = snapshots.len(),
            "批量发货资格判定完成"
        );

        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shipment::{Shipment, ShipmentTag};
    use crate::domain::types::{EligibilityClassification, SelectionPath, ShipmentStatus};
    use crate::engine::MOVE_OVER_TAG;

    // ==========================================
    // 测试辅助函数
    // ==========================================
    fn create_test_order(order_number: &str, shipments: &[(&str, ShipmentStatus)], tagged: &[&str]) -> OrderShipments {
        OrderShipments {
            order_number: order_number.to_string(),
            shipments: shipments
                .iter()
                .map(|(id, status)| Shipment::new(*id, Some(status.clone()), None))
                .collect(),
            tags: tagged
                .iter()
                .map(|id| ShipmentTag::new(*id, MOVE_OVER_TAG))
                .collect(),
        }
    }

    // ==========================================
    // 测试用例
    // ==========================================

    #[test]
    fn test_evaluate_order_single() {
        let engine = EligibilityEngine::new();
        let order = create_test_order(
            "100-1",
            &[("A", ShipmentStatus::OnHold), ("B", ShipmentStatus::Pending)],
            &["B"],
        );

        let (snapshot, reasons) = engine.evaluate_order(&order);

        assert_eq!(snapshot.order_number, "100-1");
        assert_eq!(snapshot.classification, EligibilityClassification::Single);
        assert_eq!(snapshot.default_shipment_id.as_deref(), Some("B"));
        assert_eq!(snapshot.shippable_shipment_ids, vec!["B".to_string()]);
        assert_eq!(snapshot.shipment_count, 2);
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("ON_HOLD"));
    }

    #[test]
    fn test_evaluate_batch_matches_per_order() {
        let engine = EligibilityEngine::new();
        let orders = vec![
            create_test_order("100-1", &[("A", ShipmentStatus::Pending)], &[]),
            create_test_order(
                "100-2",
                &[("B", ShipmentStatus::Pending), ("C", ShipmentStatus::Pending)],
                &["B", "C"],
            ),
            create_test_order(
                "100-3",
                &[("D", ShipmentStatus::Pending), ("E", ShipmentStatus::Pending)],
                &["E"],
            ),
            create_test_order("100-4", &[], &[]),
        ];

        let batch = engine.evaluate_batch(&orders);

        assert_eq!(batch.len(), 4);
        for (order, snapshot) in orders.iter().zip(batch.iter()) {
            let (single, _) = engine.evaluate_order(order);
            assert_eq!(&single, snapshot);
        }

        assert_eq!(batch[0].selection_path, SelectionPath::Fallback);
        assert_eq!(batch[1].classification, EligibilityClassification::Multiple);
        assert_eq!(batch[2].default_shipment_id.as_deref(), Some("E"));
        assert_eq!(batch[3].classification, EligibilityClassification::None);
    }

    #[test]
    fn test_evaluate_batch_tags_do_not_leak_between_orders() {
        // 订单 2 的标签只作用于自己的发货单
        let engine = EligibilityEngine::new();
        let orders = vec![
            create_test_order(
                "200-1",
                &[("A", ShipmentStatus::Pending), ("B", ShipmentStatus::Pending)],
                &[],
            ),
            create_test_order("200-2", &[("C", ShipmentStatus::Pending)], &["C"]),
        ];

        let batch = engine.evaluate_batch(&orders);

        assert_eq!(batch[0].classification, EligibilityClassification::Multiple);
        assert_eq!(batch[0].selection_path, SelectionPath::Fallback);
        assert_eq!(batch[1].selection_path, SelectionPath::Primary);
    }
}
