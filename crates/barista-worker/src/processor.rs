//! 订单制作处理器
//!
//! 每条新订单消息的完整处理流程：加载订单 -> 状态转移检查 ->
//! 条件认领（同事务写入出箱记录）-> 投递完成事件。
//! 每条消息都重新加载订单，认领以读取到的状态为条件，
//! 并发重复投递下只有一个实例能认领成功。

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::BaristaError;
use crate::identity::WorkerIdentity;
use crate::publisher::CompletionPublisher;
use crate::store::OrderStore;

/// 订单制作处理器
///
/// 组合订单存储（状态转移 + 出箱落库）、完成事件发布器和本实例身份。
pub struct OrderProcessor<S: OrderStore> {
    store: Arc<S>,
    publisher: Arc<dyn CompletionPublisher>,
    identity: WorkerIdentity,
}

impl<S: OrderStore> OrderProcessor<S> {
    pub fn new(
        store: Arc<S>,
        publisher: Arc<dyn CompletionPublisher>,
        identity: WorkerIdentity,
    ) -> Self {
        Self {
            store,
            publisher,
            identity,
        }
    }

    /// 处理一条新订单消息
    pub async fn process(&self, order_id: i64) -> Result<(), BaristaError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(BaristaError::OrderNotFound { order_id })?;

        if order.state.brew().is_none() {
            return Err(BaristaError::NotBrewable {
                order_id,
                state: order.state,
            });
        }

        let outbox_id = self
            .store
            .claim_order(
                order_id,
                order.state,
                self.identity.as_str(),
                self.publisher.destination(),
            )
            .await?
            .ok_or(BaristaError::AlreadyClaimed { order_id })?;

        info!(order_id, barista_id = %self.identity, "订单制作完成");

        // 出箱记录已随认领事务落库，这里的即时投递失败只影响时延，不影响最终送达
        match self.publisher.publish(order_id).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_dispatched(outbox_id).await {
                    warn!(
                        order_id,
                        outbox_id,
                        error = %e,
                        "标记出箱记录已投递失败，补偿任务可能重复投递"
                    );
                }
            }
            Err(e) => {
                warn!(
                    order_id,
                    outbox_id,
                    error = %e,
                    "完成事件即时投递失败，等待补偿任务重试"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use mockall::predicate::eq;
    use tokio_test::assert_ok;

    use coffee_shared::error::CoffeeError;

    use crate::models::{Order, OrderState};
    use crate::store::MockOrderStore;

    /// 记录发布调用的发布器，可注入失败
    struct RecordingPublisher {
        published: Mutex<Vec<i64>>,
        fail: bool,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn published(&self) -> Vec<i64> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionPublisher for RecordingPublisher {
        fn destination(&self) -> &str {
            "finished-orders"
        }

        async fn publish(&self, order_id: i64) -> Result<(), CoffeeError> {
            if self.fail {
                return Err(CoffeeError::Kafka("broker 不可达".to_string()));
            }
            self.published.lock().unwrap().push(order_id);
            Ok(())
        }
    }

    fn order_in_state(id: i64, state: OrderState) -> Order {
        let now = Utc::now();
        Order {
            id,
            customer: "李雷".to_string(),
            waiter_id: "waiter-1".to_string(),
            barista_id: None,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    fn processor(
        store: MockOrderStore,
        publisher: Arc<RecordingPublisher>,
    ) -> OrderProcessor<MockOrderStore> {
        OrderProcessor::new(Arc::new(store), publisher, WorkerIdentity::fixed("barista-test"))
    }

    /// 待制作订单：状态推进、署名本实例、恰好发布一次
    #[tokio::test]
    async fn test_process_brews_placed_order() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .with(eq(42))
            .times(1)
            .returning(|id| Ok(Some(order_in_state(id, OrderState::Placed))));
        store
            .expect_claim_order()
            .withf(|order_id, expected, barista_id, destination| {
                *order_id == 42
                    && *expected == OrderState::Placed
                    && barista_id == "barista-test"
                    && destination == "finished-orders"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Some(7)));
        store
            .expect_mark_dispatched()
            .with(eq(7))
            .times(1)
            .returning(|_| Ok(()));

        let publisher = Arc::new(RecordingPublisher::new());
        let processor = processor(store, publisher.clone());

        tokio_test::assert_ok!(processor.process(42).await);
        assert_eq!(publisher.published(), vec![42]);
    }

    /// 不存在的订单：不认领、不发布
    #[tokio::test]
    async fn test_process_unknown_order() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .with(eq(99))
            .times(1)
            .returning(|_| Ok(None));
        store.expect_claim_order().times(0);

        let publisher = Arc::new(RecordingPublisher::new());
        let processor = processor(store, publisher.clone());

        let err = processor.process(99).await.unwrap_err();
        assert!(matches!(err, BaristaError::OrderNotFound { order_id: 99 }));
        assert!(publisher.published().is_empty());
    }

    /// 已制作的订单（重复投递）：状态不变、零发布
    #[tokio::test]
    async fn test_process_already_brewed_order() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .with(eq(7))
            .times(1)
            .returning(|id| Ok(Some(order_in_state(id, OrderState::Brewed))));
        store.expect_claim_order().times(0);

        let publisher = Arc::new(RecordingPublisher::new());
        let processor = processor(store, publisher.clone());

        let err = processor.process(7).await.unwrap_err();
        assert!(matches!(
            err,
            BaristaError::NotBrewable {
                order_id: 7,
                state: OrderState::Brewed,
            }
        ));
        assert!(publisher.published().is_empty());
    }

    /// 读取与认领之间被其他实例抢先：条件更新落空，零发布
    #[tokio::test]
    async fn test_process_lost_concurrent_claim() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .with(eq(42))
            .times(1)
            .returning(|id| Ok(Some(order_in_state(id, OrderState::Placed))));
        store
            .expect_claim_order()
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        store.expect_mark_dispatched().times(0);

        let publisher = Arc::new(RecordingPublisher::new());
        let processor = processor(store, publisher.clone());

        let err = processor.process(42).await.unwrap_err();
        assert!(matches!(err, BaristaError::AlreadyClaimed { order_id: 42 }));
        assert!(publisher.published().is_empty());
    }

    /// 即时投递失败：处理仍算成功，出箱记录保持未投递交给补偿任务
    #[tokio::test]
    async fn test_publish_failure_leaves_outbox_pending() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .with(eq(42))
            .times(1)
            .returning(|id| Ok(Some(order_in_state(id, OrderState::Placed))));
        store
            .expect_claim_order()
            .times(1)
            .returning(|_, _, _, _| Ok(Some(9)));
        // 投递失败时绝不能标记已投递
        store.expect_mark_dispatched().times(0);

        let publisher = Arc::new(RecordingPublisher::failing());
        let processor = processor(store, publisher.clone());

        tokio_test::assert_ok!(processor.process(42).await);
        assert!(publisher.published().is_empty());
    }

    /// 存储故障向上传播为可重试错误
    #[tokio::test]
    async fn test_storage_failure_is_retryable() {
        let mut store = MockOrderStore::new();
        store
            .expect_find_order()
            .times(1)
            .returning(|_| Err(CoffeeError::Database(sqlx::Error::PoolTimedOut)));

        let publisher = Arc::new(RecordingPublisher::new());
        let processor = processor(store, publisher.clone());

        let err = processor.process(42).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(publisher.published().is_empty());
    }
}
