// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Telegram Bot API 通道
//!
//! 1. sendMessage (表单: chat_id, text)
//! 2. 快照存在时 sendPhoto (multipart: chat_id, photo)
//!
//! 文字失败时仍尝试发送照片, 返回第一个错误

use tracing::warn;

use super::{file_name_of, redact, AlertBackend, AlertEvent, Delivery, DispatchError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramBackend {
    api_base: String,
    token: String,
    chat_id: String,
    agent: ureq::Agent,
}

impl TelegramBackend {
    pub fn new(api_base: &str, token: &str, chat_id: &str, agent: ureq::Agent) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            agent,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// ureq 的错误信息包含完整 URL, 需要隐藏 token
    fn scrub(&self, e: ureq::Error) -> DispatchError {
        match DispatchError::from(e) {
            DispatchError::Transport(msg) => DispatchError::Transport(redact(&msg, &self.token)),
            other => other,
        }
    }

    fn send_message(&self, text: &str) -> Result<(), DispatchError> {
        self.agent
            .post(&self.method_url("sendMessage"))
            .send_form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .map_err(|e| self.scrub(e))?;
        Ok(())
    }

    fn send_photo(&self, file_name: &str, photo: &[u8]) -> Result<(), DispatchError> {
        let (content_type, body) = Multipart::new()
            .text("chat_id", &self.chat_id)
            .file("photo", file_name, "image/jpeg", photo)
            .finish();

        self.agent
            .post(&self.method_url("sendPhoto"))
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|e| self.scrub(e))?;
        Ok(())
    }
}

impl AlertBackend for TelegramBackend {
    fn name(&self) -> &str {
        "telegram"
    }

    fn deliver(&self, event: &AlertEvent) -> Result<Delivery, DispatchError> {
        let message = self.send_message(&event.message);

        let mut snapshot_attached = false;
        let mut photo_result = Ok(());
        if let (Some(path), Some(photo)) = (event.snapshot.as_deref(), event.read_snapshot()) {
            photo_result = self.send_photo(&file_name_of(path), &photo);
            snapshot_attached = photo_result.is_ok();
        }

        if let Err(e) = message {
            if snapshot_attached {
                warn!("⚠️ Telegram 文字发送失败, 照片已送达: {}", e);
            }
            return Err(e);
        }
        photo_result?;

        Ok(Delivery {
            snapshot_attached,
            detail: None,
        })
    }
}

/// multipart/form-data 请求体
pub(crate) struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub(crate) fn new() -> Self {
        Self {
            boundary: format!("----sentinel{:016x}", rand::random::<u64>()),
            body: Vec::new(),
        }
    }

    pub(crate) fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub(crate) fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// 返回 (Content-Type, 请求体)
    pub(crate) fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::test_server::serve;
    use crate::alert::{http_agent, NotificationKind};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_multipart_layout() {
        let (content_type, body) = Multipart::new()
            .text("chat_id", "42")
            .file("photo", "empty_1.jpg", "image/jpeg", b"JPEG")
            .finish();

        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let body = String::from_utf8(body).unwrap();

        assert!(body.starts_with(&format!("--{}\r\n", boundary)));
        assert!(body.contains("name=\"chat_id\"\r\n\r\n42\r\n"));
        assert!(body.contains("name=\"photo\"; filename=\"empty_1.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"));
        assert!(body.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_message_only_without_snapshot() {
        let (base, rx) = serve(vec![(200, r#"{"ok":true}"#)]);
        let backend = TelegramBackend::new(&base, "123:abc", "42", http_agent(Duration::from_secs(5)));

        let event = AlertEvent::new(NotificationKind::Alert, "fan on", 0, true)
            .with_snapshot("/no/such/file.jpg");
        let delivery = backend.deliver(&event).unwrap();
        assert!(!delivery.snapshot_attached);

        let req = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(req.request_line.starts_with("POST /bot123:abc/sendMessage"));
        let body = req.body_text();
        assert!(body.contains("chat_id=42"));
        assert!(body.contains("text=fan+on") || body.contains("text=fan%20on"));
    }

    #[test]
    fn test_message_then_photo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty_1.jpg");
        std::fs::write(&path, b"\xff\xd8photo").unwrap();

        let (base, rx) = serve(vec![(200, r#"{"ok":true}"#), (200, r#"{"ok":true}"#)]);
        let backend = TelegramBackend::new(&format!("{}/", base), "123:abc", "42", http_agent(Duration::from_secs(5)));

        let event = AlertEvent::new(NotificationKind::Alert, "fan on", 0, true).with_snapshot(&path);
        let delivery = backend.deliver(&event).unwrap();
        assert!(delivery.snapshot_attached);

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.request_line.starts_with("POST /bot123:abc/sendMessage"));
        assert!(second.request_line.starts_with("POST /bot123:abc/sendPhoto"));
        assert!(second
            .header("content-type")
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
        assert!(second.body.windows(7).any(|w| w == b"\xff\xd8photo"));
    }

    #[test]
    fn test_photo_sent_even_if_message_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty_2.jpg");
        std::fs::write(&path, b"\xff\xd8photo").unwrap();

        let (base, rx) = serve(vec![(400, r#"{"ok":false}"#), (200, r#"{"ok":true}"#)]);
        let backend = TelegramBackend::new(&base, "123:abc", "42", http_agent(Duration::from_secs(5)));

        let event = AlertEvent::new(NotificationKind::Alert, "fan on", 0, true).with_snapshot(&path);
        let err = backend.deliver(&event).unwrap_err();
        assert!(matches!(err, DispatchError::Status(400)));

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.request_line.starts_with("POST /bot123:abc/sendMessage"));
        assert!(second.request_line.starts_with("POST /bot123:abc/sendPhoto"));
        assert!(second.body.windows(7).any(|w| w == b"\xff\xd8photo"));
    }

    #[test]
    fn test_photo_error_reported_after_message() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty_3.jpg");
        std::fs::write(&path, b"\xff\xd8photo").unwrap();

        let (base, _rx) = serve(vec![(200, r#"{"ok":true}"#), (413, r#"{"ok":false}"#)]);
        let backend = TelegramBackend::new(&base, "123:abc", "42", http_agent(Duration::from_secs(5)));

        let event = AlertEvent::new(NotificationKind::Alert, "fan on", 0, true).with_snapshot(&path);
        let err = backend.deliver(&event).unwrap_err();
        assert!(matches!(err, DispatchError::Status(413)));
    }

    #[test]
    fn test_transport_error_hides_token() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = TelegramBackend::new(
            &format!("http://{}", addr),
            "secret-token",
            "42",
            http_agent(Duration::from_secs(2)),
        );
        let event = AlertEvent::new(NotificationKind::Alert, "x", 0, true);
        let err = backend.deliver(&event).unwrap_err();
        assert_eq!(err.code(), "transport");
        assert!(!err.to_string().contains("secret-token"));
    }
}
