//! 新订单消费
//!
//! 将 Kafka 消息解析为订单 ID 并交给 OrderProcessor，
//! 按处理结果决定提交偏移量还是重投：
//! - 成功、坏引用、状态不合法 -> 提交（重试不会有不同结果）
//! - 瞬时基础设施故障 -> 回退偏移量等待重投

use tokio::sync::watch;
use tracing::{error, info, warn};

use coffee_shared::config::AppConfig;
use coffee_shared::kafka::{ConsumerMessage, Disposition, KafkaConsumer, channels};

use crate::error::BaristaError;
use crate::processor::OrderProcessor;
use crate::store::OrderStore;

/// 新订单消费者
///
/// 组合 KafkaConsumer（消息拉取）和 OrderProcessor（业务处理），
/// 订阅的 topic 由通道绑定表解析 `new-orders` 得到。
pub struct OrderConsumer<S: OrderStore> {
    consumer: KafkaConsumer,
    processor: OrderProcessor<S>,
    topic: String,
}

impl<S: OrderStore> OrderConsumer<S> {
    pub fn new(config: &AppConfig, processor: OrderProcessor<S>) -> Result<Self, BaristaError> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?;
        let topic = config.channels.resolve(channels::NEW_ORDERS);
        Ok(Self {
            consumer,
            processor,
            topic,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), BaristaError> {
        self.consumer.subscribe(&[&self.topic])?;

        info!(topic = %self.topic, "新订单消费者已启动");

        let processor = self.processor;

        self.consumer
            .start(shutdown, |msg| {
                let processor = &processor;
                async move { process_message(processor, &msg).await }
            })
            .await;

        info!("新订单消费者已停止");
        Ok(())
    }
}

/// 处理单条消息并给出处置决定
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的 Consumer。
pub async fn process_message<S: OrderStore>(
    processor: &OrderProcessor<S>,
    msg: &ConsumerMessage,
) -> Disposition {
    let order_id = match parse_order_id(msg) {
        Ok(id) => id,
        Err(e) => {
            error!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "消息负载无法解析为订单 ID，丢弃"
            );
            return Disposition::Ack;
        }
    };

    match processor.process(order_id).await {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            log_failure(order_id, &e);
            disposition_for(&e)
        }
    }
}

/// 根据错误类别决定提交还是重投
pub fn disposition_for(err: &BaristaError) -> Disposition {
    if err.is_retryable() {
        Disposition::Redeliver
    } else {
        Disposition::Ack
    }
}

/// 失败日志分级：重复投递是管线的正常现象，只有坏数据和故障需要关注
fn log_failure(order_id: i64, err: &BaristaError) {
    match err {
        BaristaError::NotBrewable { .. } | BaristaError::AlreadyClaimed { .. } => {
            info!(order_id, reason = %err, "订单无需处理");
        }
        BaristaError::OrderNotFound { .. } => {
            error!(order_id, error = %err, "上游引用了不存在的订单");
        }
        BaristaError::MalformedOrderId { .. } => {
            error!(order_id, error = %err, "非法消息");
        }
        BaristaError::Shared(_) => {
            warn!(order_id, error = %err, "处理订单遇到瞬时故障，消息将重新投递");
        }
    }
}

/// 从消息负载解析订单 ID（十进制文本）
fn parse_order_id(msg: &ConsumerMessage) -> Result<i64, BaristaError> {
    let raw = msg.payload_str().map_err(|_| BaristaError::MalformedOrderId {
        raw: format!("{:?}", msg.payload),
    })?;

    raw.trim()
        .parse::<i64>()
        .map_err(|_| BaristaError::MalformedOrderId {
            raw: raw.to_string(),
        })
}
