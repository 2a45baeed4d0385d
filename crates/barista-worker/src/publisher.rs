//! 完成事件发布
//!
//! 目的通道在构造时从通道绑定表解析一次，之后的每次发布都指向同一 topic；
//! 换绑目的地只需要改配置，不需要改代码。

use async_trait::async_trait;
use tracing::debug;

use coffee_shared::config::ChannelBindings;
use coffee_shared::error::CoffeeError;
use coffee_shared::kafka::{KafkaProducer, channels};

/// 完成事件发布接口
///
/// 消息体就是订单 ID 的十进制文本，不附加任何信封。
/// 测试可以用内存实现替换。
#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    /// 解析后的实际目的 topic
    fn destination(&self) -> &str;

    /// 发布一条完成事件
    async fn publish(&self, order_id: i64) -> Result<(), CoffeeError>;
}

/// 基于 Kafka 的完成事件发布器
pub struct KafkaCompletionPublisher {
    producer: KafkaProducer,
    destination: String,
}

impl KafkaCompletionPublisher {
    /// 创建发布器，目的 topic 由通道绑定表解析 `finished-orders` 得到
    pub fn new(producer: KafkaProducer, bindings: &ChannelBindings) -> Self {
        let destination = bindings.resolve(channels::FINISHED_ORDERS);
        Self {
            producer,
            destination,
        }
    }
}

#[async_trait]
impl CompletionPublisher for KafkaCompletionPublisher {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn publish(&self, order_id: i64) -> Result<(), CoffeeError> {
        let payload = order_id.to_string();
        self.producer
            .send(&self.destination, &payload, payload.as_bytes())
            .await?;

        debug!(order_id, destination = %self.destination, "完成事件已发布");
        Ok(())
    }
}
