//! 通知领域模型
//!
//! 定义通知事件（Notice）、通知类型（NoticeType）、投递偏好（DeliveryPreference）
//! 以及投递任务（DispatchJob）的统一结构。这些对象由上游事件生产方创建，
//! 投递管道只读取、从不修改。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NoticeType — 通知类型
// ---------------------------------------------------------------------------

/// 通知类型
///
/// 描述一类事件：稳定的 label 用于引用，template_slug 决定投递内容使用的模板。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeType {
    pub label: String,
    pub display: String,
    #[serde(default)]
    pub description: String,
    pub template_slug: String,
    /// 管理端是否允许投递该类通知；是否据此过滤由调用方决定
    #[serde(default = "default_allowed")]
    pub allowed: bool,
}

fn default_allowed() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Party — 收件人 / 发送人
// ---------------------------------------------------------------------------

/// 通知参与方（收件人或发送人）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Notice — 通知事件
// ---------------------------------------------------------------------------

/// 关联对象引用：内容类型 + 对象 ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    pub content_type: String,
    pub object_id: String,
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.content_type, self.object_id)
    }
}

/// 通知事件
///
/// 一次不可变的事件记录。`content` 为空表示该通知不关联任何领域对象。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub notice_type: NoticeType,
    pub recipient: Party,
    pub sender: Option<Party>,
    pub content: Option<ContentRef>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Medium / DeliveryPreference — 投递偏好
// ---------------------------------------------------------------------------

/// 投递渠道标识（slug）
///
/// 偏好记录中的渠道可能在当前进程中没有对应的后端，
/// 因此这里保留原始字符串而不是闭合枚举，由注册表在查找时报错。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Medium(pub String);

impl Medium {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 投递偏好：每个 (用户, 通知类型, 渠道) 一条
///
/// 投递管道把传入的偏好列表视为完整的待执行集合，不按 `send` 过滤。
/// `uuid` 与 `token` 只供退订流程使用，这里原样透传。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPreference {
    pub id: i64,
    pub user_id: String,
    pub notice_type_label: String,
    pub medium: Medium,
    pub send: bool,
    pub can_modify: bool,
    pub uuid: Uuid,
    pub token: String,
}

// ---------------------------------------------------------------------------
// DispatchJob — 队列中的投递任务
// ---------------------------------------------------------------------------

/// 投递任务
///
/// 上游生产方写入任务队列的消息体：一条通知 + 有序偏好列表 + 额外上下文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    /// 任务唯一标识（UUID v7），用于日志关联与死信追踪
    pub job_id: Uuid,
    pub notice: Notice,
    pub preferences: Vec<DeliveryPreference>,
    #[serde(default)]
    pub extra_context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl DispatchJob {
    pub fn new(
        notice: Notice,
        preferences: Vec<DeliveryPreference>,
        extra_context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            job_id: Uuid::now_v7(),
            notice,
            preferences,
            extra_context,
        }
    }
}
