// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Webhook 通道: POST JSON 到通知服务端, 仅 HTTP 201 视为成功

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{AlertBackend, AlertEvent, Delivery, DispatchError, NotificationKind};

/// 请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload<'a> {
    pub message: &'a str,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub people_count: u32,
    pub fan_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl<'a> AlertPayload<'a> {
    /// 快照存在时编码为 data URI, 否则省略 snapshot 字段
    pub fn from_event(event: &'a AlertEvent) -> Self {
        let snapshot = event
            .read_snapshot()
            .map(|bytes| format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(bytes)));

        Self {
            message: &event.message,
            kind: event.kind,
            people_count: event.people_count,
            fan_status: event.fan_status,
            snapshot,
        }
    }
}

/// 服务端应答 `{success, message, notification: {_id, ...}}`
#[derive(Debug, Default, Deserialize)]
struct ServerReply {
    #[serde(default)]
    notification: Option<NotificationRef>,
}

#[derive(Debug, Deserialize)]
struct NotificationRef {
    #[serde(rename = "_id")]
    id: Option<String>,
}

pub struct WebhookBackend {
    url: String,
    agent: ureq::Agent,
}

impl WebhookBackend {
    pub fn new(url: impl Into<String>, agent: ureq::Agent) -> Self {
        Self {
            url: url.into(),
            agent,
        }
    }
}

impl AlertBackend for WebhookBackend {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, event: &AlertEvent) -> Result<Delivery, DispatchError> {
        let payload = AlertPayload::from_event(event);
        let snapshot_attached = payload.snapshot.is_some();

        let response = self.agent.post(&self.url).send_json(&payload)?;
        if response.status() != 201 {
            return Err(DispatchError::Status(response.status()));
        }

        // 应答体仅用于日志, 解析失败不影响结果
        let reply: ServerReply = response.into_json().unwrap_or_default();
        let detail = reply
            .notification
            .and_then(|n| n.id)
            .map(|id| format!("notification {}", id));

        Ok(Delivery {
            snapshot_attached,
            detail,
        })
    }
}
