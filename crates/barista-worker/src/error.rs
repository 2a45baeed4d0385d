//! 咖啡师服务专用错误类型
//!
//! 在共享库 CoffeeError 基础上定义本服务特有的错误变体。
//! 变体区分两类失败：重试无望的业务性拒绝（坏引用、状态不合法），
//! 和应当触发消息重投的瞬时基础设施故障（透传共享库错误）。

use coffee_shared::error::CoffeeError;

use crate::models::OrderState;

/// 订单制作处理错误
#[derive(Debug, thiserror::Error)]
pub enum BaristaError {
    /// 消息引用的订单在存储中不存在，多半是上游数据损坏
    #[error("订单不存在: order_id={order_id}")]
    OrderNotFound { order_id: i64 },

    /// 订单当前状态不允许制作，常见于 Kafka 重复投递已处理的消息
    #[error("订单状态不可制作: order_id={order_id} state={state}")]
    NotBrewable { order_id: i64, state: OrderState },

    /// 条件认领未命中任何行——另一实例在读取与更新之间抢先完成了制作
    #[error("订单已被其他实例认领: order_id={order_id}")]
    AlreadyClaimed { order_id: i64 },

    /// 消息负载无法解析为订单 ID
    #[error("消息负载不是合法的订单 ID: {raw}")]
    MalformedOrderId { raw: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] CoffeeError),
}

impl BaristaError {
    /// 是否应触发消息重投
    ///
    /// 只有瞬时基础设施故障需要重投；业务性拒绝重试不会有不同结果。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Shared(e) if e.is_retryable())
    }
}
