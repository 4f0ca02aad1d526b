//! 投递任务执行器
//!
//! 包装投递调用，负责重试与失败上报：
//! - 关联对象缺失走 resolution 轨道（默认 60 秒后重试）
//! - 其余可重试错误走 general 轨道（默认 30 分钟后重试）
//! - 未知渠道等永久错误不重试
//!
//! 两条轨道共享同一个重试计数，各自按自己的上限判断是否继续。
//! 重试耗尽或永久失败的任务交给 `FailureSink`（默认写入死信队列）。
//! 工作池用信号量限制并发，许可只在尝试执行期间持有，等待重试延迟时释放。
//! 已提交未结束的任务数另有上限；关闭时等待重试的任务立即转交 `FailureSink`。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notice_shared::config::RetryConfig;
use notice_shared::dlq::DlqProducer;
use notice_shared::error::NoticeError;
use notice_shared::kafka::topics;
use notice_shared::models::DispatchJob;
use notice_shared::observability::metrics::{record_dispatch, record_retry};
use notice_shared::retry::RetryPolicy;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, RetryTrack};

// ---------------------------------------------------------------------------
// RetryPolicies — 两条重试轨道
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub resolution: RetryPolicy,
    pub general: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicies {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            resolution: RetryPolicy::fixed(
                Duration::from_secs(config.resolution_delay_secs),
                config.resolution_max_retries,
            ),
            general: RetryPolicy::fixed(
                Duration::from_secs(config.general_delay_secs),
                config.general_max_retries,
            ),
        }
    }

    pub fn for_track(&self, track: RetryTrack) -> Option<&RetryPolicy> {
        match track {
            RetryTrack::Resolution => Some(&self.resolution),
            RetryTrack::General => Some(&self.general),
            RetryTrack::Never => None,
        }
    }

    /// 根据失败类型和已重试次数决定本次尝试的去向
    pub fn decide(&self, error: &DispatchError, retries: u32) -> AttemptState {
        let track = error.retry_track();
        match self.for_track(track) {
            Some(policy) if policy.should_retry(retries) => AttemptState::Retrying {
                track,
                delay: policy.delay_for_attempt(retries),
            },
            _ => AttemptState::PermanentlyFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptState — 单次尝试的状态机
// ---------------------------------------------------------------------------

/// 单次尝试的状态：`Pending -> Running -> {Succeeded, Retrying, PermanentlyFailed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Running,
    Succeeded,
    Retrying { track: RetryTrack, delay: Duration },
    PermanentlyFailed,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: &AttemptState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// 单次尝试的状态跟踪
#[derive(Debug)]
struct Attempt {
    number: u32,
    state: AttemptState,
}

impl Attempt {
    fn new(number: u32) -> Self {
        Self {
            number,
            state: AttemptState::Pending,
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "非法状态迁移: {:?} -> {:?}",
            self.state,
            next
        );
        debug!(attempt = self.number, from = ?self.state, to = ?next, "尝试状态迁移");
        self.state = next;
    }
}

/// 任务最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// `Succeeded`、`PermanentlyFailed`，或关闭时被打断的 `Retrying`
    pub state: AttemptState,
    /// 总共执行的尝试次数（含首次）
    pub attempts: u32,
    /// 每次重试所走的轨道，按发生顺序
    pub retries: Vec<RetryTrack>,
}

// ---------------------------------------------------------------------------
// FailureSink — 执行器的失败通道
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, job: &DispatchJob, error: &DispatchError, attempts: u32);
}

/// 只记录日志的失败通道
pub struct LogFailureSink;

#[async_trait]
impl FailureSink for LogFailureSink {
    async fn report(&self, job: &DispatchJob, error: &DispatchError, attempts: u32) {
        error!(
            job_id = %job.job_id,
            notice_id = %job.notice.id,
            error_code = error.code(),
            attempts,
            error = %error,
            "投递任务永久失败"
        );
    }
}

/// 写入 Kafka 死信队列的失败通道
pub struct KafkaDeadLetterSink {
    dlq: DlqProducer,
}

impl KafkaDeadLetterSink {
    pub fn new(dlq: DlqProducer) -> Self {
        Self { dlq }
    }
}

#[async_trait]
impl FailureSink for KafkaDeadLetterSink {
    async fn report(&self, job: &DispatchJob, error: &DispatchError, attempts: u32) {
        let payload = match serde_json::to_string(job) {
            Ok(payload) => payload,
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "序列化投递任务失败，无法写入死信队列");
                return;
            }
        };

        if let Err(e) = self
            .dlq
            .send_to_dlq(
                &job.job_id.to_string(),
                topics::NOTICE_DISPATCH,
                &payload,
                &error.to_string(),
                error.code(),
                attempts,
            )
            .await
        {
            error!(
                job_id = %job.job_id,
                error = %e,
                "发送到死信队列失败，投递任务可能丢失"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

pub struct TaskRunner {
    dispatcher: Dispatcher,
    policies: RetryPolicies,
    failure_sink: Arc<dyn FailureSink>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    /// 每个已提交任务从提交到结束持有一个名额
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl TaskRunner {
    pub fn new(
        dispatcher: Dispatcher,
        policies: RetryPolicies,
        failure_sink: Arc<dyn FailureSink>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let max_in_flight = concurrency * 32;
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dispatcher,
            policies,
            failure_sink,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            shutdown_tx,
        }
    }

    /// 设置已提交未结束任务的上限（包括等待重试延迟的任务）
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self.in_flight = Arc::new(Semaphore::new(self.max_in_flight));
        self
    }

    /// 关闭执行器并等待所有已提交任务结束
    ///
    /// 正在执行的尝试会跑完；处于重试延迟中的任务不再等待，
    /// 连同已执行的尝试次数交给失败通道，之后的 `submit` 直接返回错误。
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        match self.in_flight.acquire_many(self.max_in_flight as u32).await {
            Ok(_all) => info!(max_in_flight = self.max_in_flight, "执行器已关闭，所有任务已结束"),
            Err(_) => warn!("任务名额信号量已关闭，跳过等待"),
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// 当前空闲的工作许可数
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// 已提交且尚未结束的任务数
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }

    /// 提交任务到工作池
    ///
    /// 先占用一个任务名额，再等待空闲工作许可，然后派生任务。
    /// 名额或许可耗尽时调用方阻塞，消费端因此自然背压。
    pub async fn submit(
        self: &Arc<Self>,
        job: DispatchJob,
    ) -> Result<JoinHandle<JobOutcome>, NoticeError> {
        if self.is_shutting_down() {
            return Err(NoticeError::Internal("执行器正在关闭".to_string()));
        }
        let slot = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| NoticeError::Internal("任务名额信号量已关闭".to_string()))?;
        let permit = self.acquire().await?;
        let runner = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let outcome = runner.run_with_permit(&job, Some(permit)).await;
            drop(slot);
            outcome
        }))
    }

    /// 执行任务直至成功、永久失败或执行器关闭
    pub async fn run(&self, job: &DispatchJob) -> JobOutcome {
        self.run_with_permit(job, None).await
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, NoticeError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| NoticeError::Internal("工作池已关闭".to_string()))
    }

    async fn run_with_permit(
        &self,
        job: &DispatchJob,
        mut permit: Option<OwnedSemaphorePermit>,
    ) -> JobOutcome {
        let mut stop = self.shutdown_tx.subscribe();
        let mut retries: Vec<RetryTrack> = Vec::new();

        loop {
            let mut attempt = Attempt::new(retries.len() as u32 + 1);

            let result = match permit.take() {
                Some(permit) => Ok(permit),
                None => self.acquire().await,
            };
            let result = match result {
                Ok(_permit) => {
                    attempt.advance(AttemptState::Running);
                    let started = Instant::now();
                    let result = self
                        .dispatcher
                        .dispatch(&job.notice, &job.preferences, job.extra_context.as_ref())
                        .await;
                    (result, started.elapsed().as_secs_f64())
                }
                Err(e) => {
                    attempt.advance(AttemptState::Running);
                    (Err(DispatchError::from(e)), 0.0)
                }
            };

            match result {
                (Ok(summary), elapsed) => {
                    attempt.advance(AttemptState::Succeeded);
                    record_dispatch("succeeded", elapsed);
                    info!(
                        job_id = %job.job_id,
                        attempts = attempt.number,
                        delivered = summary.delivered,
                        suppressed = summary.suppressed,
                        "投递任务成功"
                    );
                    return JobOutcome {
                        state: attempt.state,
                        attempts: attempt.number,
                        retries,
                    };
                }
                (Err(err), elapsed) => {
                    let next = self.policies.decide(&err, retries.len() as u32);
                    attempt.advance(next);

                    if let AttemptState::Retrying { track, delay } = next {
                        record_dispatch("retrying", elapsed);
                        warn!(
                            job_id = %job.job_id,
                            attempt = attempt.number,
                            track = track.as_str(),
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "投递失败，将在延迟后整体重试"
                        );

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = stopping(&mut stop) => {
                                warn!(
                                    job_id = %job.job_id,
                                    attempts = attempt.number,
                                    track = track.as_str(),
                                    "执行器关闭，等待重试的任务转交失败通道"
                                );
                                self.failure_sink.report(job, &err, attempt.number).await;
                                return JobOutcome {
                                    state: attempt.state,
                                    attempts: attempt.number,
                                    retries,
                                };
                            }
                        }

                        record_retry(track.as_str());
                        retries.push(track);
                        continue;
                    }

                    record_dispatch("failed", elapsed);
                    self.failure_sink.report(job, &err, attempt.number).await;
                    return JobOutcome {
                        state: attempt.state,
                        attempts: attempt.number,
                        retries,
                    };
                }
            }
        }
    }
}

/// 在收到关闭信号时完成
async fn stopping(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}
