//! 死信队列
//!
//! 投递任务重试耗尽或遇到不可重试错误后，由任务执行器把原始任务连同失败原因
//! 写入死信队列（DLQ），作为执行器的失败通道。死信消息只用于排查与人工重放，
//! 本模块不做自动重新投递。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::NoticeError;
use crate::kafka::{KafkaProducer, topics};
use crate::retry::{RetryPolicy, retry_with_policy};

// ---------------------------------------------------------------------------
// DeadLetterMessage — 死信消息信封
// ---------------------------------------------------------------------------

/// 死信消息信封
///
/// 包装原始任务，附加失败原因、错误码和已执行的尝试次数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    /// 原始消息 ID（投递任务的 job_id）
    pub message_id: String,
    /// 原始 topic
    pub source_topic: String,
    /// 原始消息内容（JSON 序列化的字符串）
    pub payload: String,
    /// 失败原因
    pub error: String,
    /// 机器可读的错误码，便于按类别统计与重放
    pub error_code: String,
    /// 总共执行的尝试次数（含首次）
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// 来源服务
    pub source_service: String,
}

impl DeadLetterMessage {
    pub fn new(
        message_id: impl Into<String>,
        source_topic: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
        error_code: impl Into<String>,
        attempts: u32,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source_topic: source_topic.into(),
            payload: payload.into(),
            error: error.into(),
            error_code: error_code.into(),
            attempts,
            failed_at: Utc::now(),
            source_service: source_service.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// DlqProducer — 将失败消息发送到死信队列
// ---------------------------------------------------------------------------

/// DLQ 生产者
///
/// 写入死信队列本身也可能遇到 broker 抖动，按 `publish_policy` 做短暂重试。
#[derive(Clone)]
pub struct DlqProducer {
    producer: KafkaProducer,
    source_service: String,
    publish_policy: RetryPolicy,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, source_service: &str, publish_policy: RetryPolicy) -> Self {
        Self {
            producer,
            source_service: source_service.to_string(),
            publish_policy,
        }
    }

    /// 将失败消息发送到死信队列
    pub async fn send_to_dlq(
        &self,
        message_id: &str,
        source_topic: &str,
        payload: &str,
        error: &str,
        error_code: &str,
        attempts: u32,
    ) -> Result<(), NoticeError> {
        let dlq_msg = DeadLetterMessage::new(
            message_id,
            source_topic,
            payload,
            error,
            error_code,
            attempts,
            &self.source_service,
        );

        retry_with_policy(
            &self.publish_policy,
            "dlq_publish",
            NoticeError::is_retryable,
            || {
                self.producer
                    .send_json(topics::DEAD_LETTER_QUEUE, message_id, &dlq_msg)
            },
        )
        .await?;

        warn!(
            message_id,
            source_topic,
            error_code,
            attempts,
            error,
            "消息已发送到死信队列"
        );

        Ok(())
    }
}
