//! 订单存储
//!
//! 定义存储接口供处理器依赖抽象而非具体实现，支持 mock 测试；
//! PostgreSQL 实现负责制作认领的事务边界。

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use coffee_shared::error::CoffeeError;

use crate::models::{Order, OrderState};

/// 首轮补偿投递的延迟窗口（秒）
///
/// 认领事务提交后处理器会立即尝试投递一次，
/// 出箱记录的首次补偿时间因此向后错开，正常路径下补偿任务扫不到它。
const RELAY_GRACE_SECS: f64 = 10.0;

/// 订单存储接口
///
/// 认领与完成事件的落库是同一个原子单元：`claim_order` 在一个事务内
/// 完成条件状态更新和出箱记录写入，要么都生效要么都回滚。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 按 ID 加载订单
    async fn find_order(&self, order_id: i64) -> Result<Option<Order>, CoffeeError>;

    /// 以读取到的状态为条件认领订单，并在同一事务内写入完成事件出箱记录
    ///
    /// 条件更新未命中任何行（并发竞争中落败、或状态已被推进）时返回 None，
    /// 整个事务回滚；成功时返回出箱记录 ID。
    async fn claim_order(
        &self,
        order_id: i64,
        expected: OrderState,
        barista_id: &str,
        destination: &str,
    ) -> Result<Option<i64>, CoffeeError>;

    /// 标记出箱记录已投递
    async fn mark_dispatched(&self, outbox_id: i64) -> Result<(), CoffeeError>;
}

/// PostgreSQL 订单存储
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_order(&self, order_id: i64) -> Result<Option<Order>, CoffeeError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, customer, waiter_id, barista_id, state, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn claim_order(
        &self,
        order_id: i64,
        expected: OrderState,
        barista_id: &str,
        destination: &str,
    ) -> Result<Option<i64>, CoffeeError> {
        let mut tx = self.pool.begin().await?;

        // 以调用方读取到的状态为条件，两个并发认领只有一个能命中
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET state = $3, barista_id = $4, updated_at = NOW()
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(order_id)
        .bind(expected)
        .bind(OrderState::Brewed)
        .bind(barista_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            // 事务随 drop 回滚
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO order_outbox
                (order_id, destination, payload, attempts, next_attempt_at, created_at)
            VALUES ($1, $2, $3, 0, NOW() + make_interval(secs => $4), NOW())
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(destination)
        .bind(order_id.to_string())
        .bind(RELAY_GRACE_SECS)
        .fetch_one(&mut *tx)
        .await?;

        let outbox_id: i64 = row.get("id");

        tx.commit().await?;
        Ok(Some(outbox_id))
    }

    async fn mark_dispatched(&self, outbox_id: i64) -> Result<(), CoffeeError> {
        sqlx::query(
            r#"
            UPDATE order_outbox
            SET dispatched_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
