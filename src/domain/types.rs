// ==========================================
// 订单发货管理系统 - 领域类型定义
// ==========================================
// 职责: 发货状态、资格分类、选择路径、排除原因
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 发货状态 (Shipment Status)
// ==========================================
// 引擎只关心 on_hold，其余取值原样保留（含未知取值）
// 序列化格式: snake_case 字符串（与上游数据一致）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShipmentStatus {
    Pending,          // 待处理
    AwaitingShipment, // 待发货
    OnHold,           // 暂扣
    Shipped,          // 已发货
    Other(String),    // 未识别的上游状态
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::AwaitingShipment => "awaiting_shipment",
            ShipmentStatus::OnHold => "on_hold",
            ShipmentStatus::Shipped => "shipped",
            ShipmentStatus::Other(raw) => raw.as_str(),
        }
    }

    /// 字符串转状态（精确匹配，不做大小写折叠）
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => ShipmentStatus::Pending,
            "awaiting_shipment" => ShipmentStatus::AwaitingShipment,
            "on_hold" => ShipmentStatus::OnHold,
            "shipped" => ShipmentStatus::Shipped,
            other => ShipmentStatus::Other(other.to_string()),
        }
    }

    pub fn is_on_hold(&self) -> bool {
        matches!(self, ShipmentStatus::OnHold)
    }
}

impl From<String> for ShipmentStatus {
    fn from(raw: String) -> Self {
        ShipmentStatus::parse(&raw)
    }
}

impl From<ShipmentStatus> for String {
    fn from(status: ShipmentStatus) -> Self {
        match status {
            ShipmentStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 资格分类 (Eligibility Classification)
// ==========================================
// 描述可发货集合的基数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EligibilityClassification {
    Single,   // 恰好一个，自动默认选中
    Multiple, // 多个，需人工选择
    None,     // 无可发货
}

impl EligibilityClassification {
    /// 按可发货数量分类
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => EligibilityClassification::None,
            1 => EligibilityClassification::Single,
            _ => EligibilityClassification::Multiple,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityClassification::Single => "single",
            EligibilityClassification::Multiple => "multiple",
            EligibilityClassification::None => "none",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single" => Some(EligibilityClassification::Single),
            "multiple" => Some(EligibilityClassification::Multiple),
            "none" => Some(EligibilityClassification::None),
            _ => None,
        }
    }
}

impl fmt::Display for EligibilityClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 选择路径 (Selection Path)
// ==========================================
// 记录可发货集合由哪条规则产生
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionPath {
    Primary,  // 带 MOVE OVER 标签的可用发货单
    Fallback, // 无标签命中，回退到全部可用发货单
    Empty,    // 可用集合为空
}

impl SelectionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPath::Primary => "PRIMARY",
            SelectionPath::Fallback => "FALLBACK",
            SelectionPath::Empty => "EMPTY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PRIMARY" => Some(SelectionPath::Primary),
            "FALLBACK" => Some(SelectionPath::Fallback),
            "EMPTY" => Some(SelectionPath::Empty),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 排除原因 (Exclusion Reason)
// ==========================================
// 硬过滤命中时给出的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExclusionReason {
    AlreadyShipped, // 已有运单号
    OnHold,         // 暂扣
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::AlreadyShipped => write!(f, "ALREADY_SHIPPED"),
            ExclusionReason::OnHold => write!(f, "ON_HOLD"),
        }
    }
}
