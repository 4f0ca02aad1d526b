//! 共享库
//!
//! 包含通知服务共用的领域模型、配置、错误处理、数据库连接、Kafka、重试与可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod kafka;
pub mod models;
pub mod observability;
pub mod retry;
