// ==========================================
// 订单发货管理系统 - Eligibility Core 纯函数库
// ==========================================
// 职责: 硬过滤、MOVE OVER 标签判定、回退、分类与默认选中
// 红线: 无状态、无副作用、无 I/O 操作
// 调用方: 缓存刷新任务、变更同步 worker、同步校验接口（三处共用）
// ==========================================

use crate::domain::eligibility::EligibilityResult;
use crate::domain::shipment::{Shipment, ShipmentTag};
use crate::domain::types::{EligibilityClassification, ExclusionReason, SelectionPath};
use std::collections::HashMap;

/// 上游拣货/打包完成标记（精确匹配，区分大小写）
pub const MOVE_OVER_TAG: &str = "MOVE OVER";

/// shipment_id → 是否带有 MOVE OVER 标签
///
/// 只包含至少带一个标签的发货单；未出现的 ID 视为 false。
pub type TagIndex<'a> = HashMap<&'a str, bool>;

// ==========================================
// EligibilityCore - 纯函数工具类
// ==========================================
pub struct EligibilityCore;

impl EligibilityCore {
    /// 硬过滤判定，返回排除原因
    ///
    /// # 规则
    /// 1. 运单号非空 → AlreadyShipped
    /// 2. 状态为 on_hold → OnHold
    /// 3. 否则 → None（通过）
    ///
    /// 缺失的状态/运单号按"不存在"处理，不会报错。
    pub fn hard_filter_verdict(shipment: &Shipment) -> Option<ExclusionReason> {
        if shipment.has_tracking_number() {
            return Some(ExclusionReason::AlreadyShipped);
        }
        if shipment.is_on_hold() {
            return Some(ExclusionReason::OnHold);
        }
        None
    }

    /// 单个发货单是否通过硬过滤
    pub fn passes_hard_filters(shipment: &Shipment) -> bool {
        Self::hard_filter_verdict(shipment).is_none()
    }

    /// 旧版过滤：只看是否暂扣，忽略运单号
    ///
    /// 仅为兼容旧调用方保留，不参与 `resolve` 的判定。
    #[deprecated(note = "忽略运单号，已发出的发货单也会通过；新调用方请使用 passes_hard_filters")]
    pub fn passes_hold_filter_legacy(shipment: &Shipment) -> bool {
        !shipment.is_on_hold()
    }

    /// 发货单是否带有 MOVE OVER 标签（线性扫描标签集合）
    pub fn has_move_over_tag(shipment: &Shipment, tags: &[ShipmentTag]) -> bool {
        tags.iter()
            .any(|tag| tag.shipment_id == shipment.id && tag.name == MOVE_OVER_TAG)
    }

    /// 单个发货单可发货判定（硬过滤 + 主条件，无回退）
    ///
    /// 回退只在订单层面有意义，这里不做回退。
    pub fn is_shippable(shipment: &Shipment, tags: &[ShipmentTag]) -> bool {
        Self::passes_hard_filters(shipment) && Self::has_move_over_tag(shipment, tags)
    }

    /// 硬过滤应用于集合，保持输入顺序
    pub fn filter_eligible<'a, I>(shipments: I) -> Vec<&'a Shipment>
    where
        I: IntoIterator<Item = &'a Shipment>,
    {
        shipments
            .into_iter()
            .filter(|&s| Self::passes_hard_filters(s))
            .collect()
    }

    /// 硬过滤 + 主条件应用于集合（无回退），保持输入顺序
    pub fn filter_shippable<'a, I>(shipments: I, tags: &[ShipmentTag]) -> Vec<&'a Shipment>
    where
        I: IntoIterator<Item = &'a Shipment>,
    {
        shipments
            .into_iter()
            .filter(|&s| Self::is_shippable(s, tags))
            .collect()
    }

    /// 预构建标签索引：O(m) 构建，之后每个发货单 O(1) 查询
    ///
    /// 同一发货单多个 MOVE OVER 标签与一个等价。
    pub fn build_tag_index<'a, I>(tags: I) -> TagIndex<'a>
    where
        I: IntoIterator<Item = &'a ShipmentTag>,
    {
        let mut index: TagIndex<'a> = HashMap::new();
        for tag in tags {
            let entry = index.entry(tag.shipment_id.as_str()).or_insert(false);
            if tag.name == MOVE_OVER_TAG {
                *entry = true;
            }
        }
        index
    }

    /// 在索引中查询 MOVE OVER 标签
    pub fn index_has_move_over(index: &TagIndex<'_>, shipment_id: &str) -> bool {
        index.get(shipment_id).copied().unwrap_or(false)
    }

    /// 订单级判定：硬过滤 → 主条件 → 回退 → 分类
    ///
    /// # 示例
    /// ```
    /// use shipping_ops::domain::{EligibilityClassification, Shipment, ShipmentStatus, ShipmentTag};
    /// use shipping_ops::engine::EligibilityCore;
    ///
    /// let shipments = vec![
    ///     Shipment::new("A", Some(ShipmentStatus::OnHold), None),
    ///     Shipment::new("B", Some(ShipmentStatus::Pending), None),
    /// ];
    /// let tags = vec![ShipmentTag::new("B", "MOVE OVER")];
    ///
    /// let result = EligibilityCore::resolve(&shipments, &tags);
    /// assert_eq!(result.classification, EligibilityClassification::Single);
    /// assert_eq!(result.default_shipment_id, Some("B"));
    /// ```
    pub fn resolve<'a>(shipments: &'a [Shipment], tags: &[ShipmentTag]) -> EligibilityResult<'a> {
        Self::resolve_by(shipments, |s| Self::has_move_over_tag(s, tags))
    }

    /// 订单级判定（使用预构建索引），结果与 `resolve` 一致
    pub fn resolve_with_index<'a>(
        shipments: &'a [Shipment],
        index: &TagIndex<'_>,
    ) -> EligibilityResult<'a> {
        Self::resolve_by(shipments, |s| Self::index_has_move_over(index, &s.id))
    }

    fn resolve_by<'a, F>(shipments: &'a [Shipment], is_tagged: F) -> EligibilityResult<'a>
    where
        F: Fn(&Shipment) -> bool,
    {
        // 步骤 1: 硬过滤
        let eligible = Self::filter_eligible(shipments);

        // 步骤 2: 主条件
        let primary: Vec<&'a Shipment> = eligible.iter().copied().filter(|&s| is_tagged(s)).collect();

        // 步骤 3: 回退（订单级，全有或全无）
        let (shippable_shipments, selection_path) = if !primary.is_empty() {
            (primary, SelectionPath::Primary)
        } else if eligible.is_empty() {
            (eligible, SelectionPath::Empty)
        } else {
            (eligible, SelectionPath::Fallback)
        };

        // 步骤 4: 分类 + 默认选中
        let classification = EligibilityClassification::from_count(shippable_shipments.len());
        let default_shipment_id = match classification {
            EligibilityClassification::Single => {
                shippable_shipments.first().copied().map(|s| s.id.as_str())
            }
            _ => None,
        };

        EligibilityResult {
            all_shipments: shipments,
            shippable_shipments,
            default_shipment_id,
            classification,
            selection_path,
        }
    }

    /// 逐个发货单给出判定原因
    ///
    /// # 返回
    /// - Vec<String>: 每个发货单一条，格式 "{id}: {判定}"
    pub fn explain(shipments: &[Shipment], tags: &[ShipmentTag]) -> Vec<String> {
        shipments
            .iter()
            .map(|s| match Self::hard_filter_verdict(s) {
                Some(reason) => format!("{}: EXCLUDED {}", s.id, reason),
                None if Self::has_move_over_tag(s, tags) => format!("{}: ELIGIBLE MOVE_OVER", s.id),
                None => format!("{}: ELIGIBLE UNTAGGED", s.id),
            })
            .collect()
    }
}
