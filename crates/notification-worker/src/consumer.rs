//! 投递任务消费者
//!
//! 从 `notice.dispatch` topic 消费 `DispatchJob`，提交到任务执行器。
//! 负载无法解析的消息记录日志后丢弃，重试与死信由执行器负责。

use std::sync::Arc;

use notice_shared::config::AppConfig;
use notice_shared::error::NoticeError;
use notice_shared::kafka::{ConsumerMessage, KafkaConsumer, KafkaProducer, topics};
use notice_shared::models::DispatchJob;
use notice_shared::observability::tracing::current_trace_id;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::runner::TaskRunner;

pub struct DispatchConsumer {
    consumer: KafkaConsumer,
    runner: Arc<TaskRunner>,
}

impl DispatchConsumer {
    pub fn new(config: &AppConfig, runner: Arc<TaskRunner>) -> Result<Self, NoticeError> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("dispatch"))?;
        Ok(Self { consumer, runner })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), NoticeError> {
        self.consumer.subscribe(&[topics::NOTICE_DISPATCH])?;

        info!(topic = topics::NOTICE_DISPATCH, "投递任务消费者已启动");

        let runner = self.runner;
        self.consumer
            .start(shutdown, |msg| {
                let runner = &runner;
                async move {
                    if let Err(e) = handle_message(runner, &msg).await {
                        error!(
                            error = %e,
                            topic = %msg.topic,
                            partition = msg.partition,
                            offset = msg.offset,
                            "提交投递任务失败"
                        );
                    }
                    Ok(())
                }
            })
            .await;

        // 停止拉取后关闭执行器，等待重试的任务转交失败通道
        runner.shutdown().await;
        info!("投递任务消费者已停止");
        Ok(())
    }
}

/// 处理单条投递任务消息
///
/// 拆分为独立函数，便于在测试中直接调用而无需连接 Kafka。
pub async fn handle_message(
    runner: &Arc<TaskRunner>,
    msg: &ConsumerMessage,
) -> Result<(), NoticeError> {
    let job: DispatchJob = match msg.deserialize_payload() {
        Ok(job) => job,
        Err(e) => {
            warn!(
                error = %e,
                partition = msg.partition,
                offset = msg.offset,
                "投递任务负载无法解析，已丢弃"
            );
            return Ok(());
        }
    };

    info!(
        job_id = %job.job_id,
        notice_id = %job.notice.id,
        notice_type = %job.notice.notice_type.label,
        preferences = job.preferences.len(),
        trace_id = current_trace_id().as_deref().unwrap_or("-"),
        "收到投递任务"
    );

    runner.submit(job).await?;
    Ok(())
}

/// 把投递任务写入 `notice.dispatch`，以 job_id 作为消息 key
pub async fn enqueue_dispatch(producer: &KafkaProducer, job: &DispatchJob) -> Result<(), NoticeError> {
    let (partition, offset) = producer
        .send_json(topics::NOTICE_DISPATCH, &job.job_id.to_string(), job)
        .await?;

    info!(job_id = %job.job_id, partition, offset, "投递任务已入队");
    Ok(())
}
