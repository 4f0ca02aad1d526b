//! 通知投递工作者
//!
//! 一条通知加上接收者的一组投递偏好构成一个投递任务：
//! 先解析通知引用的关联对象，再按偏好顺序把通知交给对应渠道的后端发送。
//! 关联对象暂不可见时整体短延迟重试，其余失败按通用策略重试，
//! 永久失败写入死信队列。

pub mod backends;
pub mod consumer;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod transport;
