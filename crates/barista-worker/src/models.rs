//! 订单领域模型
//!
//! 枚举同时支持数据库（sqlx）和 JSON（serde）序列化

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 订单生命周期状态
///
/// 状态单调前进：PLACED 之后由本服务推进到 BREWED，
/// 再往后的取餐/出餐由下游阶段负责。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// 已下单 - 等待制作
    #[default]
    Placed,
    /// 已制作 - 本服务的终态
    Brewed,
    /// 已取餐
    Taken,
    /// 已出餐
    Served,
}

impl OrderState {
    /// 制作状态转移规则
    ///
    /// 只有尚未制作的订单可以进入 `Brewed`；已制作或更晚的状态返回 None，
    /// 由此拒绝重复投递和未经下单的订单。
    pub fn brew(self) -> Option<OrderState> {
        match self {
            OrderState::Placed => Some(OrderState::Brewed),
            OrderState::Brewed | OrderState::Taken | OrderState::Served => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::Placed => "PLACED",
            OrderState::Brewed => "BREWED",
            OrderState::Taken => "TAKEN",
            OrderState::Served => "SERVED",
        };
        f.write_str(s)
    }
}

/// 咖啡订单
///
/// 本服务对订单的唯一写入是制作认领：state 推进到 Brewed、
/// barista_id 一次性写入本实例身份、updated_at 刷新。
/// 其余字段在上游创建后不再变化。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    /// 顾客标识
    pub customer: String,
    /// 接单服务员标识
    pub waiter_id: String,
    /// 认领本单的咖啡师标识，制作前为 NULL
    #[sqlx(default)]
    pub barista_id: Option<String>,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brew_from_placed() {
        assert_eq!(OrderState::Placed.brew(), Some(OrderState::Brewed));
    }

    #[test]
    fn test_brew_rejects_brewed_and_later() {
        // 已制作或更晚的状态不允许再次制作
        assert_eq!(OrderState::Brewed.brew(), None);
        assert_eq!(OrderState::Taken.brew(), None);
        assert_eq!(OrderState::Served.brew(), None);
    }

    #[test]
    fn test_order_state_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderState::Placed).unwrap(),
            "\"PLACED\""
        );
        assert_eq!(
            serde_json::from_str::<OrderState>("\"BREWED\"").unwrap(),
            OrderState::Brewed
        );
    }

    #[test]
    fn test_order_state_display() {
        assert_eq!(OrderState::Placed.to_string(), "PLACED");
        assert_eq!(OrderState::Brewed.to_string(), "BREWED");
    }

    #[test]
    fn test_order_state_default() {
        assert_eq!(OrderState::default(), OrderState::Placed);
    }
}
