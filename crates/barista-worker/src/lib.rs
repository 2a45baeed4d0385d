//! 咖啡师工作进程
//!
//! 订单管线的制作阶段：从新订单通道消费订单 ID，
//! 在数据库中完成制作状态转移并认领订单，
//! 再向完成通道发布携带同一 ID 的完成事件。
//! 状态变更与完成事件通过同事务的出箱记录保持原子，
//! 重复投递由以读取状态为条件的认领更新天然拒绝。

pub mod consumer;
pub mod error;
pub mod identity;
pub mod models;
pub mod outbox;
pub mod processor;
pub mod publisher;
pub mod store;
