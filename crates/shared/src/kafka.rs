//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一错误映射、偏移量提交和优雅关闭语义，避免各服务重复编写样板代码。
//!
//! 偏移量采用手动提交：handler 对每条消息给出 [`Disposition`]，
//! `Ack` 提交偏移量，`Redeliver` 将分区回退到该消息等待下次拉取。
//! 由此实现 at-least-once 语义——只有明确确认过的消息才不会再次出现。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::CoffeeError;

/// 重投前的等待时间，避免对故障中的下游形成重试风暴
const REDELIVER_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// 逻辑通道常量
// ---------------------------------------------------------------------------

/// 集中管理管线的逻辑通道名，防止字符串散落在各服务中导致拼写不一致。
/// 逻辑名经配置中的通道绑定表解析为实际 topic。
pub mod channels {
    pub const NEW_ORDERS: &str = "new-orders";
    pub const FINISHED_ORDERS: &str = "finished-orders";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, CoffeeError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| CoffeeError::Kafka(format!("负载非 UTF-8 编码: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// handler 对一条消息的处置决定
///
/// 不可恢复的失败（坏引用、重复投递）也应返回 `Ack`——
/// 重试不会产生不同结果，反而会阻塞整个分区。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 提交偏移量，消息不再投递
    Ack,
    /// 回退分区偏移量，消息在退避后重新投递
    Redeliver,
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// 设置 `message.timeout.ms` 为 5 秒——5 秒内仍无法投递的消息
    /// 应交由出箱补偿机制处理，而非无限等待。
    pub fn new(config: &KafkaConfig) -> Result<Self, CoffeeError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CoffeeError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }

    /// 发送原始字节消息，返回落盘的分区与偏移量
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), CoffeeError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| CoffeeError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer`，关闭自动提交，并提供基于 `watch` channel
/// 的优雅关闭语义，确保进程退出时不会丢失正在处理的消息。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 允许同一服务内不同消费逻辑使用独立的消费组。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, CoffeeError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| CoffeeError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), CoffeeError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| CoffeeError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时调用 handler 处理，按返回的 [`Disposition`] 提交或回退偏移量。
    /// - 关闭信号变为 `true` 时退出循环，确保正在执行的 handler 能自然完成。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Disposition>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);
                    debug!(topic = %topic, partition, offset, "收到 Kafka 消息");

                    match handler(msg).await {
                        Disposition::Ack => self.commit(&topic, partition, offset),
                        Disposition::Redeliver => {
                            self.rewind(&topic, partition, offset);
                            tokio::time::sleep(REDELIVER_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }

    /// 提交偏移量（已处理消息的下一条）
    fn commit(&self, topic: &str, partition: i32, offset: i64) {
        let mut tpl = TopicPartitionList::new();
        let result = tpl
            .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .and_then(|_| self.consumer.commit(&tpl, CommitMode::Async));

        if let Err(e) = result {
            warn!(topic, partition, offset, error = %e, "提交偏移量失败");
        }
    }

    /// 将分区回退到指定偏移量，该消息将在下次拉取时重新投递
    fn rewind(&self, topic: &str, partition: i32, offset: i64) {
        warn!(topic, partition, offset, "回退分区偏移量，消息将重新投递");

        if let Err(e) = self
            .consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
        {
            // seek 失败时偏移量未提交，消息仍会在 rebalance 或重启后重新投递
            error!(topic, partition, offset, error = %e, "回退偏移量失败");
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
