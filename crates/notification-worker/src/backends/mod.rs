//! 渠道后端
//!
//! 每种投递渠道提供一个 `BackendAdapter` 实现，负责把一条通知真正送达。
//! 已知的后端种类由闭合枚举 `BackendKind` 列出，注册表按其 id / slug 建立索引。
//!
//! ## 支持的渠道
//!
//! - **Email**: 通过收件人传输发送模板邮件

mod email;

pub use email::{EmailBackend, EmailBackendConfig};

use async_trait::async_trait;
use notice_shared::models::Notice;

use crate::context::DeliveryContext;
use crate::error::Result;
use crate::transport::DeliveryReceipt;

/// 已知的后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Email,
}

impl BackendKind {
    pub const ALL: [BackendKind; 1] = [BackendKind::Email];

    /// 稳定的数字 id，与历史数据中的渠道编号保持一致
    pub fn id(&self) -> u16 {
        match self {
            Self::Email => 4,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Email => "email",
        }
    }

    /// 展示用标题；本地化在展示层完成
    pub fn title(&self) -> &'static str {
        match self {
            Self::Email => "By Email",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }
}

/// 渠道后端 trait
///
/// `send` 返回 `Ok(None)` 表示后端按配置吞掉了失败，没有产生投递。
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn id(&self) -> u16 {
        self.kind().id()
    }

    fn slug(&self) -> &'static str {
        self.kind().slug()
    }

    fn title(&self) -> &'static str {
        self.kind().title()
    }

    async fn send(
        &self,
        notice: &Notice,
        context: &DeliveryContext,
    ) -> Result<Option<DeliveryReceipt>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_identity() {
        assert_eq!(BackendKind::Email.id(), 4);
        assert_eq!(BackendKind::Email.slug(), "email");
        assert_eq!(BackendKind::Email.title(), "By Email");
    }

    #[test]
    fn test_backend_kind_from_slug() {
        assert_eq!(BackendKind::from_slug("email"), Some(BackendKind::Email));
        assert_eq!(BackendKind::from_slug("sms"), None);
    }
}
