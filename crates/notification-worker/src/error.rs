//! 投递管道错误类型
//!
//! 在共享库 NoticeError 基础上定义投递管道特有的错误变体，
//! 任务执行器据此把每种失败映射到对应的重试轨道。

use notice_shared::error::NoticeError;
use thiserror::Error;

/// 重试轨道
///
/// 关联对象缺失与一般投递失败使用两条独立的策略，延迟和上限各自配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrack {
    /// 关联对象暂不可见，短延迟重试
    Resolution,
    /// 其余投递失败，按执行器的通用策略重试
    General,
    /// 永久失败，不重试
    Never,
}

impl RetryTrack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::General => "general",
            Self::Never => "never",
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// 通知引用的对象已不存在（或尚未写入）
    #[error("关联对象不存在: content_type={content_type}, object_id={object_id}")]
    ResolutionFailed {
        content_type: String,
        object_id: String,
    },

    #[error("未找到渠道后端: {medium}")]
    UnknownBackend { medium: String },

    #[error("通知模板未找到: {template}")]
    TemplateMissing { template: String },

    #[error("投递失败: 渠道={medium}, 原因={reason}")]
    Delivery { medium: String, reason: String },

    /// 对象存储本身不可用或配置缺失，与“对象不存在”区分开
    #[error("对象存储错误: {0}")]
    Store(String),

    #[error(transparent)]
    Shared(#[from] NoticeError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResolutionFailed { .. } => "RESOLUTION_FAILED",
            Self::UnknownBackend { .. } => "UNKNOWN_BACKEND",
            Self::TemplateMissing { .. } => "TEMPLATE_MISSING",
            Self::Delivery { .. } => "DELIVERY_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 该错误归属的重试轨道
    pub fn retry_track(&self) -> RetryTrack {
        match self {
            Self::ResolutionFailed { .. } => RetryTrack::Resolution,
            Self::UnknownBackend { .. } => RetryTrack::Never,
            Self::TemplateMissing { .. } | Self::Delivery { .. } | Self::Store(_) => {
                RetryTrack::General
            }
            Self::Shared(_) => RetryTrack::General,
        }
    }
}
