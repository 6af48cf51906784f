// ==========================================
// 订单发货管理系统 - 发货 API
// ==========================================
// 职责: 同步查询订单发货资格、校验发货动作
// 红线: 每次调用都按当前数据现算，不读缓存
// ==========================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::{EligibilityClassification, SelectionPath};
use crate::engine::EligibilityCore;
use crate::repository::shipment_repo::ShipmentRepository;

// ==========================================
// DTO
// ==========================================

/// 单个发货单的展示信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentEligibilityView {
    pub shipment_id: String,
    pub shipment_status: Option<String>,
    pub tracking_number: Option<String>,
    pub shippable: bool,
}

/// 订单发货资格查询响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEligibilityResponse {
    pub order_number: String,
    pub classification: EligibilityClassification,
    pub default_shipment_id: Option<String>,
    pub shippable_shipment_ids: Vec<String>,
    pub selection_path: SelectionPath,
    pub shipments: Vec<ShipmentEligibilityView>,
    /// 逐单判定原因
    pub reasons: Vec<String>,
}

// ==========================================
// ShipmentApi - 发货 API
// ==========================================
pub struct ShipmentApi {
    shipment_repo: Arc<ShipmentRepository>,
}

impl ShipmentApi {
    pub fn new(shipment_repo: Arc<ShipmentRepository>) -> Self {
        Self { shipment_repo }
    }

    fn require_order_number(order_number: &str) -> ApiResult<&str> {
        let trimmed = order_number.trim();
        if trimmed.is_empty() {
            return Err(ApiError::InvalidInput("订单号不能为空".to_string()));
        }
        Ok(trimmed)
    }

    /// 查询订单发货资格
    ///
    /// 订单不存在时返回 classification=none 的空响应。
    pub fn get_order_eligibility(&self, order_number: &str) -> ApiResult<OrderEligibilityResponse> {
        let order_number = Self::require_order_number(order_number)?;
        let order = self.shipment_repo.load_order(order_number)?;

        let result = EligibilityCore::resolve(&order.shipments, &order.tags);
        let reasons = EligibilityCore::explain(&order.shipments, &order.tags);

        let shipments = order
            .shipments
            .iter()
            .map(|s| ShipmentEligibilityView {
                shipment_id: s.id.clone(),
                shipment_status: s.shipment_status.as_ref().map(|st| st.as_str().to_string()),
                tracking_number: s.tracking_number.clone(),
                shippable: result.contains_shippable(&s.id),
            })
            .collect();

        debug!(
            order_number,
            classification = %result.classification,
            "查询订单发货资格"
        );

        Ok(OrderEligibilityResponse {
            order_number: order_number.to_string(),
            classification: result.classification,
            default_shipment_id: result.default_shipment_id.map(str::to_string),
            shippable_shipment_ids: result.shippable_ids().into_iter().map(str::to_string).collect(),
            selection_path: result.selection_path,
            shipments,
            reasons,
        })
    }

    /// 校验发货动作
    ///
    /// # 参数
    /// - order_number: 订单号
    /// - shipment_id: 调用方指定的发货单（可选）
    ///
    /// # 返回
    /// - Ok(shipment_id): 本次可发货的发货单
    /// - Err(ShipmentNotShippable): 指定的发货单不在可发货集合
    /// - Err(SelectionRequired): 未指定且有多个候选
    /// - Err(NoShippableShipment): 没有可发货的发货单
    pub fn validate_ship_action(
        &self,
        order_number: &str,
        shipment_id: Option<&str>,
    ) -> ApiResult<String> {
        let order_number = Self::require_order_number(order_number)?;
        let order = self.shipment_repo.load_order(order_number)?;
        let result = EligibilityCore::resolve(&order.shipments, &order.tags);

        // 发货单号按原样比对，只有订单号做 trim
        match shipment_id.filter(|id| !id.is_empty()) {
            Some(requested) => {
                if result.contains_shippable(requested) {
                    Ok(requested.to_string())
                } else {
                    warn!(order_number, shipment_id = requested, "指定发货单不可发货");
                    Err(ApiError::ShipmentNotShippable {
                        order_number: order_number.to_string(),
                        shipment_id: requested.to_string(),
                    })
                }
            }
            None => match (result.classification, result.default_shipment_id) {
                (EligibilityClassification::Single, Some(id)) => Ok(id.to_string()),
                (EligibilityClassification::Multiple, _) => Err(ApiError::SelectionRequired {
                    order_number: order_number.to_string(),
                    candidates: result.shippable_ids().into_iter().map(str::to_string).collect(),
                }),
                _ => Err(ApiError::NoShippableShipment {
                    order_number: order_number.to_string(),
                }),
            },
        }
    }
}
