use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::read_envelope;
use crate::error::AppResult;

/// 通知接收方
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    User(String),
    /// 群会话，由消息服务扩散给全部成员
    Group(String),
}

/// 一条提示消息
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub send_id: String,
    pub recipient: Recipient,
    pub content_type: i32,
    pub content: serde_json::Value,
    pub operation_id: String,
}

/// 消息服务，只负责投递，不保证送达
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_notification(&self, notification: &Notification) -> AppResult<()>;
}

#[derive(Serialize)]
struct SendNotificationReq<'a> {
    #[serde(rename = "sendID")]
    send_id: &'a str,
    #[serde(rename = "recvID", skip_serializing_if = "Option::is_none")]
    recv_id: Option<&'a str>,
    #[serde(rename = "groupID", skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a str>,
    #[serde(rename = "contentType")]
    content_type: i32,
    content: &'a serde_json::Value,
}

#[derive(Clone)]
pub struct HttpMessenger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMessenger {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/msg/send_notification", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send_notification(&self, notification: &Notification) -> AppResult<()> {
        let (recv_id, group_id) = match &notification.recipient {
            Recipient::User(user_id) => (Some(user_id.as_str()), None),
            Recipient::Group(group_id) => (None, Some(group_id.as_str())),
        };
        let body = SendNotificationReq {
            send_id: &notification.send_id,
            recv_id,
            group_id,
            content_type: notification.content_type,
            content: &notification.content,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("operationID", &notification.operation_id)
            .json(&body)
            .send()
            .await?;
        read_envelope::<serde_json::Value>("msg service", response).await?;
        Ok(())
    }
}
