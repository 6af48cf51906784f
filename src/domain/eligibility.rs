// ==========================================
// 订单发货管理系统 - 发货资格结果
// ==========================================
// 职责: 引擎输出（借用输入）与可持久化快照
// 红线: 结果每次调用重新计算，引擎自身不持久化
// ==========================================

use crate::domain::shipment::Shipment;
use crate::domain::types::{EligibilityClassification, SelectionPath};
use serde::{Deserialize, Serialize};

// ==========================================
// EligibilityResult - 引擎输出
// ==========================================
/// 单个订单的发货资格判定结果
///
/// 所有发货单引用均指向调用方传入的切片，顺序与输入一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityResult<'a> {
    /// 原始输入（未修改，保持顺序）
    pub all_shipments: &'a [Shipment],
    /// 可发货子序列（保持顺序）
    pub shippable_shipments: Vec<&'a Shipment>,
    /// 默认选中的发货单（仅 Single 时存在）
    pub default_shipment_id: Option<&'a str>,
    /// 可发货集合的基数分类
    pub classification: EligibilityClassification,
    /// 可发货集合的来源规则
    pub selection_path: SelectionPath,
}

impl<'a> EligibilityResult<'a> {
    /// 可发货发货单 ID 列表
    pub fn shippable_ids(&self) -> Vec<&'a str> {
        self.shippable_shipments.iter().copied().map(|s| s.id.as_str()).collect()
    }

    /// 指定发货单是否在可发货集合内
    pub fn contains_shippable(&self, shipment_id: &str) -> bool {
        self.shippable_shipments.iter().any(|s| s.id == shipment_id)
    }

    /// 生成可序列化快照
    pub fn to_snapshot(&self, order_number: &str) -> EligibilitySnapshot {
        EligibilitySnapshot {
            order_number: order_number.to_string(),
            classification: self.classification,
            default_shipment_id: self.default_shipment_id.map(str::to_string),
            shippable_shipment_ids: self
                .shippable_shipments
                .iter()
                .map(|s| s.id.clone())
                .collect(),
            shipment_count: self.all_shipments.len(),
            selection_path: self.selection_path,
        }
    }
}

// ==========================================
// EligibilitySnapshot - 可持久化/可传输快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilitySnapshot {
    pub order_number: String,
    pub classification: EligibilityClassification,
    pub default_shipment_id: Option<String>,
    pub shippable_shipment_ids: Vec<String>,
    pub shipment_count: usize,
    pub selection_path: SelectionPath,
}
