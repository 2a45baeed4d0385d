//! 完成事件出箱补偿
//!
//! 认领事务会同时写入一条出箱记录；正常路径在事务提交后立即投递并标记。
//! 本模块的补偿任务扫描仍未投递的记录并按退避策略重发，
//! 保证存储已提交的完成事件最终一定到达下游——宁可重复，绝不丢失。

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use coffee_shared::config::OutboxConfig;
use coffee_shared::error::CoffeeError;
use coffee_shared::kafka::KafkaProducer;
use coffee_shared::retry::RetryPolicy;

/// 出箱记录
///
/// payload 在认领时就定稿（订单 ID 的十进制文本），
/// 补偿投递不需要回表读订单。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub order_id: i64,
    /// 投递目的 topic，认领时由通道绑定表解析后固化
    pub destination: String,
    pub payload: String,
    /// 已失败的补偿投递次数
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 出箱补偿任务
///
/// 周期扫描到期未投递的记录并重发。`FOR UPDATE SKIP LOCKED`
/// 让多副本同时运行补偿而不互相阻塞，也不会对同一记录并发重发。
pub struct OutboxRelay {
    pool: PgPool,
    producer: KafkaProducer,
    poll_interval: Duration,
    batch_size: i64,
    retry_policy: RetryPolicy,
}

impl OutboxRelay {
    pub fn new(pool: PgPool, producer: KafkaProducer, config: &OutboxConfig) -> Self {
        Self {
            pool,
            producer,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// 启动补偿循环，直到收到 shutdown 信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "出箱补偿任务已启动"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("收到关闭信号，出箱补偿任务退出");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(records = n, "完成一轮补偿投递"),
                        Err(e) => warn!(error = %e, "扫描出箱记录失败"),
                    }
                }
            }
        }
    }

    /// 扫描并重发一批到期未投递的记录，返回本轮处理的记录数
    pub async fn drain_once(&self) -> Result<usize, CoffeeError> {
        let mut tx = self.pool.begin().await?;

        let pending: Vec<OutboxRecord> = sqlx::query_as(
            r#"
            SELECT id, order_id, destination, payload, attempts,
                   next_attempt_at, dispatched_at, created_at
            FROM order_outbox
            WHERE dispatched_at IS NULL AND next_attempt_at <= NOW()
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        for record in &pending {
            match self
                .producer
                .send(
                    &record.destination,
                    &record.order_id.to_string(),
                    record.payload.as_bytes(),
                )
                .await
            {
                Ok(_) => {
                    sqlx::query("UPDATE order_outbox SET dispatched_at = NOW() WHERE id = $1")
                        .bind(record.id)
                        .execute(&mut *tx)
                        .await?;

                    info!(
                        order_id = record.order_id,
                        outbox_id = record.id,
                        attempts = record.attempts,
                        "补偿投递成功"
                    );
                }
                Err(e) => {
                    let attempt = record.attempts as u32;
                    let delay = self.retry_policy.delay_for_attempt(attempt);

                    sqlx::query(
                        r#"
                        UPDATE order_outbox
                        SET attempts = attempts + 1,
                            next_attempt_at = NOW() + make_interval(secs => $2)
                        WHERE id = $1
                        "#,
                    )
                    .bind(record.id)
                    .bind(delay.as_secs_f64())
                    .execute(&mut *tx)
                    .await?;

                    if self.retry_policy.should_retry(attempt) {
                        warn!(
                            order_id = record.order_id,
                            outbox_id = record.id,
                            attempts = record.attempts + 1,
                            error = %e,
                            "补偿投递失败，已安排下次重试"
                        );
                    } else {
                        // 超出重试预算也不放弃投递，升级日志级别提示人工关注
                        error!(
                            order_id = record.order_id,
                            outbox_id = record.id,
                            attempts = record.attempts + 1,
                            error = %e,
                            "补偿投递持续失败，需人工关注"
                        );
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(pending.len())
    }
}
