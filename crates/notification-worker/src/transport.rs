//! 收件人邮件传输
//!
//! 邮件后端把"用某个模板给收件人发信"委托给传输层。模板渲染发生在传输层一侧，
//! 模板不存在时返回 `TemplateMissing`，由邮件后端决定吞掉还是上抛。

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use notice_shared::models::Party;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// 投递回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// 外部渠道返回的消息标识，用于追踪投递状态
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("模板不存在: {0}")]
    TemplateMissing(String),

    #[error("{0}")]
    Delivery(String),
}

/// 收件人传输接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientTransport: Send + Sync {
    async fn send_templated(
        &self,
        recipient: &Party,
        template_name: &str,
        context: &Map<String, Value>,
    ) -> Result<DeliveryReceipt, TransportError>;
}

// ---------------------------------------------------------------------------
// TemplateCatalog
// ---------------------------------------------------------------------------

/// 已知模板名清单
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    names: HashSet<String>,
}

impl TemplateCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// 递归扫描目录，以相对路径（`/` 分隔）作为模板名
    pub fn load_dir(root: &Path) -> std::io::Result<Self> {
        let mut names = HashSet::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(root) {
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    names.insert(name);
                }
            }
        }

        info!(root = %root.display(), count = names.len(), "模板清单已加载");
        Ok(Self { names })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// LogMailTransport
// ---------------------------------------------------------------------------

/// 日志邮件传输
///
/// 校验模板存在后仅记录日志，不真正外发；用于本地运行与未配置中继的环境。
pub struct LogMailTransport {
    catalog: TemplateCatalog,
}

impl LogMailTransport {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl RecipientTransport for LogMailTransport {
    async fn send_templated(
        &self,
        recipient: &Party,
        template_name: &str,
        context: &Map<String, Value>,
    ) -> Result<DeliveryReceipt, TransportError> {
        if !self.catalog.contains(template_name) {
            return Err(TransportError::TemplateMissing(template_name.to_string()));
        }
        let Some(email) = recipient.email.as_deref() else {
            return Err(TransportError::Delivery(format!(
                "收件人缺少邮箱地址: {}",
                recipient.id
            )));
        };

        let message_id = Uuid::now_v7().to_string();
        info!(
            channel = "EMAIL",
            recipient_id = %recipient.id,
            to = email,
            template = template_name,
            message_id = %message_id,
            context_keys = context.len(),
            "模拟发送邮件通知"
        );

        Ok(DeliveryReceipt { message_id })
    }
}

// ---------------------------------------------------------------------------
// HttpMailTransport
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    template: &'a str,
    context: &'a Map<String, Value>,
}

/// 通过 HTTP 邮件中继服务投递
///
/// 中继负责渲染模板；返回 404 表示模板不存在。
pub struct HttpMailTransport {
    client: reqwest::Client,
    relay_url: String,
    from_address: String,
}

impl HttpMailTransport {
    pub fn new(relay_url: &str, from_address: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Delivery(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            relay_url: relay_url.trim_end_matches('/').to_string(),
            from_address: from_address.to_string(),
        })
    }
}

#[async_trait]
impl RecipientTransport for HttpMailTransport {
    async fn send_templated(
        &self,
        recipient: &Party,
        template_name: &str,
        context: &Map<String, Value>,
    ) -> Result<DeliveryReceipt, TransportError> {
        let to = recipient.email.as_deref().ok_or_else(|| {
            TransportError::Delivery(format!("收件人缺少邮箱地址: {}", recipient.id))
        })?;

        let request = RelayRequest {
            from: &self.from_address,
            to,
            template: template_name,
            context,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.relay_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Delivery(format!("邮件中继请求失败: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::TemplateMissing(template_name.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Delivery(format!("邮件中继返回 {status}")));
        }

        let receipt: DeliveryReceipt = response
            .json()
            .await
            .map_err(|e| TransportError::Delivery(format!("邮件中继响应无法解析: {e}")))?;

        debug!(message_id = %receipt.message_id, template = template_name, "邮件已提交到中继");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Party {
        Party {
            id: "user-001".to_string(),
            email: Some("alice@example.com".to_string()),
            display_name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_transport_sends_known_template() {
        let transport =
            LogMailTransport::new(TemplateCatalog::new(["notification/emails/welcome.html"]));

        let receipt = transport
            .send_templated(&alice(), "notification/emails/welcome.html", &Map::new())
            .await
            .unwrap();
        assert!(!receipt.message_id.is_empty());
    }

    #[tokio::test]
    async fn test_log_transport_reports_missing_template() {
        let transport = LogMailTransport::new(TemplateCatalog::default());

        let err = transport
            .send_templated(&alice(), "notification/emails/unknown.html", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TemplateMissing(ref t) if t == "notification/emails/unknown.html"));
    }

    #[tokio::test]
    async fn test_log_transport_requires_email() {
        let transport = LogMailTransport::new(TemplateCatalog::new(["t.html"]));
        let recipient = Party {
            email: None,
            ..alice()
        };

        let err = transport
            .send_templated(&recipient, "t.html", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Delivery(_)));
    }

    #[test]
    fn test_catalog_load_dir_uses_relative_names() {
        let root = std::env::temp_dir().join(format!("notice-templates-{}", Uuid::new_v4()));
        let nested = root.join("notification").join("emails");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("welcome.html"), "<p>hi</p>").unwrap();

        let catalog = TemplateCatalog::load_dir(&root).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("notification/emails/welcome.html"));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
