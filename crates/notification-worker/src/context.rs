//! 投递上下文
//!
//! 每次投递调用构建一份上下文，包含通知、收件人、发送人、关联对象、通知类型，
//! 以及调用方传入的额外键。对单个偏好调用后端时再附加 `notice_setting`。
//! 上下文从不持久化。

use notice_shared::models::{DeliveryPreference, Notice, NoticeType, Party};
use serde_json::{Map, Value};

/// 投递上下文
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryContext {
    pub notice: Notice,
    pub recipient: Party,
    pub sender: Option<Party>,
    pub related_object: Option<Value>,
    pub notice_type: NoticeType,
    /// 当前正在处理的投递偏好；基础上下文中为空
    pub notice_setting: Option<DeliveryPreference>,
    pub extra: Map<String, Value>,
}

impl DeliveryContext {
    /// 构建基础上下文
    ///
    /// `extra` 只被读取并复制，调用方持有的映射不会被修改。
    pub fn build(
        notice: &Notice,
        related_object: Option<Value>,
        extra: Option<&Map<String, Value>>,
    ) -> Self {
        Self {
            notice: notice.clone(),
            recipient: notice.recipient.clone(),
            sender: notice.sender.clone(),
            related_object,
            notice_type: notice.notice_type.clone(),
            notice_setting: None,
            extra: extra.cloned().unwrap_or_default(),
        }
    }

    /// 基于基础上下文派生某个偏好专用的上下文
    pub fn for_preference(&self, preference: &DeliveryPreference) -> Self {
        Self {
            notice_setting: Some(preference.clone()),
            ..self.clone()
        }
    }

    /// 展平为模板可用的 JSON 对象
    ///
    /// 固定键覆盖同名的额外键。
    pub fn to_template_data(&self) -> Map<String, Value> {
        let mut data = self.extra.clone();
        data.insert("notice".into(), to_value(&self.notice));
        data.insert("recipient".into(), to_value(&self.recipient));
        data.insert("sender".into(), to_value(&self.sender));
        data.insert(
            "related_object".into(),
            self.related_object.clone().unwrap_or(Value::Null),
        );
        data.insert("notice_type".into(), to_value(&self.notice_type));
        if let Some(setting) = &self.notice_setting {
            data.insert("notice_setting".into(), to_value(setting));
        }
        data
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    // 模型均为普通结构体，序列化不会失败
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notice_shared::models::Medium;
    use uuid::Uuid;

    fn sample_notice() -> Notice {
        Notice {
            id: "notice-001".to_string(),
            notice_type: NoticeType {
                label: "comment_reply".to_string(),
                display: "Comment reply".to_string(),
                description: String::new(),
                template_slug: "comment_reply".to_string(),
                allowed: true,
            },
            recipient: Party {
                id: "user-001".to_string(),
                email: Some("alice@example.com".to_string()),
                display_name: "Alice".to_string(),
            },
            sender: Some(Party {
                id: "user-002".to_string(),
                email: None,
                display_name: "Bob".to_string(),
            }),
            content: None,
            created_at: Utc::now(),
        }
    }

    fn preference(id: i64, medium: &str) -> DeliveryPreference {
        DeliveryPreference {
            id,
            user_id: "user-001".to_string(),
            notice_type_label: "comment_reply".to_string(),
            medium: Medium::new(medium),
            send: true,
            can_modify: true,
            uuid: Uuid::new_v4(),
            token: "token".to_string(),
        }
    }

    #[test]
    fn test_build_does_not_mutate_caller_extra() {
        let mut extra = Map::new();
        extra.insert("site_name".into(), Value::from("Example"));
        let before = extra.clone();

        let mut context = DeliveryContext::build(&sample_notice(), None, Some(&extra));
        context.extra.insert("injected".into(), Value::Bool(true));

        assert_eq!(extra, before);
        assert_eq!(context.extra.get("site_name"), Some(&Value::from("Example")));
    }

    #[test]
    fn test_template_data_has_fixed_keys() {
        let base = DeliveryContext::build(&sample_notice(), None, None);
        let data = base.for_preference(&preference(1, "email")).to_template_data();

        for key in ["notice", "recipient", "sender", "related_object", "notice_type", "notice_setting"] {
            assert!(data.contains_key(key), "缺少键 {key}");
        }
        assert_eq!(data["related_object"], Value::Null);
        assert_eq!(data["notice_setting"]["id"], Value::from(1));
        assert_eq!(data["sender"]["displayName"], Value::from("Bob"));
    }

    #[test]
    fn test_fixed_keys_override_extra() {
        let mut extra = Map::new();
        extra.insert("recipient".into(), Value::from("spoofed"));
        extra.insert("footer".into(), Value::from("bye"));

        let data = DeliveryContext::build(&sample_notice(), None, Some(&extra)).to_template_data();
        assert_eq!(data["recipient"]["id"], Value::from("user-001"));
        assert_eq!(data["footer"], Value::from("bye"));
    }

    #[test]
    fn test_preference_contexts_are_independent() {
        let base = DeliveryContext::build(
            &sample_notice(),
            Some(serde_json::json!({"id": 42})),
            None,
        );
        let mut first = base.for_preference(&preference(1, "email"));
        let second = base.for_preference(&preference(2, "sms"));

        first.extra.insert("mutated".into(), Value::Bool(true));
        first.related_object = None;

        assert!(base.notice_setting.is_none());
        assert_eq!(second.notice_setting.as_ref().map(|p| p.id), Some(2));
        assert!(!second.extra.contains_key("mutated"));
        assert_eq!(second.related_object, Some(serde_json::json!({"id": 42})));
    }
}
