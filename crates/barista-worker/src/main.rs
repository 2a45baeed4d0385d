//! 咖啡师工作进程入口
//!
//! 消费新订单消息，完成制作状态转移并发布完成事件。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use coffee_shared::{config::AppConfig, database::Database, kafka::KafkaProducer, observability};

use barista_worker::{
    consumer::OrderConsumer, identity::WorkerIdentity, outbox::OutboxRelay,
    processor::OrderProcessor, publisher::KafkaCompletionPublisher, store::PgOrderStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置；此时日志尚未初始化，失败只能走 stderr
    let config = AppConfig::load("barista-worker").unwrap_or_else(|e| {
        eprintln!("加载配置失败，使用默认配置: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志
    observability::init(&config.observability)?;

    info!(environment = %config.environment, "barista-worker 启动中");

    // 3. 基础设施连接
    let db = Database::connect(&config.database).await?;
    let producer = KafkaProducer::new(&config.kafka)?;

    // 4. 本实例身份：进程生命周期内不变，处理的每一单都以它署名
    let identity = WorkerIdentity::generate(&config.barista.name_prefix);
    info!(identity = %identity, "本实例咖啡师身份已生成");

    // 5. 组装处理管线
    let store = Arc::new(PgOrderStore::new(db.pool().clone()));
    let publisher = Arc::new(KafkaCompletionPublisher::new(
        producer.clone(),
        &config.channels,
    ));
    let processor = OrderProcessor::new(store, publisher, identity);
    let consumer = OrderConsumer::new(&config, processor)?;
    let relay = OutboxRelay::new(db.pool().clone(), producer, &config.outbox);

    // 6. 启动消费与补偿任务，等待退出信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(consumer.run(shutdown_rx.clone()));
    let relay_task = tokio::spawn(relay.run(shutdown_rx));

    signal::ctrl_c().await?;
    info!("收到退出信号，开始优雅关闭");
    shutdown_tx.send(true)?;

    let _ = tokio::join!(consumer_task, relay_task);
    db.close().await;

    info!("barista-worker 已退出");
    Ok(())
}
