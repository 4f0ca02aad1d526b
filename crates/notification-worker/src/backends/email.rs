//! Email 邮件后端
//!
//! 根据通知类型的 template_slug 推导模板名，交给收件人传输发送。
//! 模板不存在时：只有在 debug 打开且未启用静默失败时才上抛，
//! 其余情况记录日志并返回空结果。其他传输错误一律上抛。

use std::sync::Arc;

use async_trait::async_trait;
use notice_shared::config::NotificationConfig;
use notice_shared::models::Notice;
use tracing::{info, warn};

use super::{BackendAdapter, BackendKind};
use crate::context::DeliveryContext;
use crate::error::{DispatchError, Result};
use crate::transport::{DeliveryReceipt, RecipientTransport, TransportError};

/// 邮件后端配置，在构造时从全局配置复制
#[derive(Debug, Clone)]
pub struct EmailBackendConfig {
    pub debug: bool,
    pub fail_silently: bool,
    pub template_prefix: String,
}

impl Default for EmailBackendConfig {
    fn default() -> Self {
        Self {
            debug: false,
            fail_silently: false,
            template_prefix: "notification/emails/".to_string(),
        }
    }
}

impl From<&NotificationConfig> for EmailBackendConfig {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            debug: config.debug,
            fail_silently: config.fail_silently,
            template_prefix: config.template_prefix.clone(),
        }
    }
}

impl EmailBackendConfig {
    /// 模板缺失是否应当作为错误上抛
    fn raise_missing_template(&self) -> bool {
        self.debug && !self.fail_silently
    }
}

pub struct EmailBackend {
    transport: Arc<dyn RecipientTransport>,
    config: EmailBackendConfig,
}

impl EmailBackend {
    pub fn new(transport: Arc<dyn RecipientTransport>, config: EmailBackendConfig) -> Self {
        Self { transport, config }
    }

    pub fn template_name(&self, notice: &Notice) -> String {
        format!(
            "{}{}.html",
            self.config.template_prefix, notice.notice_type.template_slug
        )
    }
}

#[async_trait]
impl BackendAdapter for EmailBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Email
    }

    async fn send(
        &self,
        notice: &Notice,
        context: &DeliveryContext,
    ) -> Result<Option<DeliveryReceipt>> {
        let template_name = self.template_name(notice);
        let data = context.to_template_data();

        match self
            .transport
            .send_templated(&notice.recipient, &template_name, &data)
            .await
        {
            Ok(receipt) => {
                info!(
                    notice_id = %notice.id,
                    recipient_id = %notice.recipient.id,
                    template = %template_name,
                    message_id = %receipt.message_id,
                    "邮件通知已发送"
                );
                Ok(Some(receipt))
            }
            Err(TransportError::TemplateMissing(template)) => {
                if self.config.raise_missing_template() {
                    return Err(DispatchError::TemplateMissing { template });
                }
                warn!(
                    notice_id = %notice.id,
                    template = %template,
                    "邮件模板不存在，已忽略"
                );
                Ok(None)
            }
            Err(TransportError::Delivery(reason)) => Err(DispatchError::Delivery {
                medium: self.slug().to_string(),
                reason,
            }),
        }
    }
}
