// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 告警分发系统 (Alert Dispatch System)
///
/// - AlertEvent:   一次告警 (消息 + 可选快照 + 人数 + 风扇状态)
/// - AlertBackend: 通知通道 (Webhook / Telegram)
/// - Dispatcher:   逐个通道投递, 单个通道失败不影响其他通道, 不重试
pub mod telegram;
pub mod webhook;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{non_empty, SentinelConfig};

pub use telegram::TelegramBackend;
pub use webhook::WebhookBackend;

/// 通知类型 (与通知服务端的 type 字段一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Alert,
    Warning,
    Info,
}

/// 告警事件: 构造后立即交给 Dispatcher, 用完即弃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub kind: NotificationKind,
    pub message: String,
    pub snapshot: Option<PathBuf>,
    pub people_count: u32,
    pub fan_status: bool,
}

impl AlertEvent {
    pub fn new(
        kind: NotificationKind,
        message: impl Into<String>,
        people_count: u32,
        fan_status: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            snapshot: None,
            people_count,
            fan_status,
        }
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot = Some(path.into());
        self
    }

    /// 读取快照内容; 文件不存在时静默跳过, 读取失败只记录日志
    pub fn read_snapshot(&self) -> Option<Vec<u8>> {
        let path = self.snapshot.as_deref()?;
        if !path.exists() {
            return None;
        }
        match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("⚠️ 读取快照失败 {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// 投递失败原因
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("网络错误: {0}")]
    Transport(String),
    #[error("服务端返回状态码 {0}")]
    Status(u16),
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("编码失败: {0}")]
    Encode(String),
    #[error("配置错误: {0}")]
    Config(String),
}

impl DispatchError {
    /// 稳定的原因代码, 供日志/统计使用
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Transport(_) => "transport",
            DispatchError::Status(_) => "status",
            DispatchError::Io(_) => "io",
            DispatchError::Encode(_) => "encode",
            DispatchError::Config(_) => "config",
        }
    }
}

impl From<ureq::Error> for DispatchError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, _) => DispatchError::Status(code),
            ureq::Error::Transport(t) => DispatchError::Transport(t.to_string()),
        }
    }
}

/// 单次成功投递的回执
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub snapshot_attached: bool,
    pub detail: Option<String>,
}

/// 通知通道
pub trait AlertBackend {
    fn name(&self) -> &str;

    fn deliver(&self, event: &AlertEvent) -> Result<Delivery, DispatchError>;
}

/// 单个通道的投递结果
#[derive(Debug)]
pub struct Outcome {
    pub backend: String,
    pub result: Result<Delivery, DispatchError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<Outcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &DispatchError)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(_) => None,
            Err(e) => Some((o.backend.as_str(), e)),
        })
    }

    pub fn any_delivered(&self) -> bool {
        self.delivered() > 0
    }

    pub fn log(&self) {
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(delivery) => info!(
                    "✓ [{}] 告警发送成功{}{}",
                    outcome.backend,
                    if delivery.snapshot_attached { " (含快照)" } else { "" },
                    delivery
                        .detail
                        .as_deref()
                        .map(|d| format!(" - {}", d))
                        .unwrap_or_default()
                ),
                Err(e) => warn!("✗ [{}] 告警发送失败 ({}): {}", outcome.backend, e.code(), e),
            }
        }
    }
}

/// 告警分发器
#[derive(Default)]
pub struct Dispatcher {
    backends: Vec<Box<dyn AlertBackend>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl AlertBackend + 'static) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn push(&mut self, backend: Box<dyn AlertBackend>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// 逐个通道投递, 失败仅记录在报告中
    pub fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let outcomes = self
            .backends
            .iter()
            .map(|backend| Outcome {
                backend: backend.name().to_string(),
                result: backend.deliver(event),
            })
            .collect();
        DispatchReport { outcomes }
    }
}

/// 带超时的 HTTP 客户端
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// 根据配置组装通知通道
pub fn build_dispatcher(config: &SentinelConfig, agent: &ureq::Agent) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    if let Some(url) = non_empty(&config.server_url) {
        dispatcher.push(Box::new(WebhookBackend::new(url, agent.clone())));
    }

    if let (Some(token), Some(chat_id)) = (
        non_empty(&config.telegram_token),
        non_empty(&config.telegram_chat_id),
    ) {
        dispatcher.push(Box::new(TelegramBackend::new(
            &config.telegram_api,
            token,
            chat_id,
            agent.clone(),
        )));
    }

    dispatcher
}

/// 日志中隐藏密钥
pub(crate) fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "***")
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot.jpg".to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recording {
        name: &'static str,
        fail_with: Option<u16>,
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl AlertBackend for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn deliver(&self, event: &AlertEvent) -> Result<Delivery, DispatchError> {
            self.seen
                .borrow_mut()
                .push(format!("{}:{}", self.name, event.message));
            match self.fail_with {
                Some(code) => Err(DispatchError::Status(code)),
                None => Ok(Delivery::default()),
            }
        }
    }

    #[test]
    fn test_failure_does_not_block_other_backends() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let dispatcher = Dispatcher::new()
            .with_backend(Recording {
                name: "broken",
                fail_with: Some(500),
                seen: seen.clone(),
            })
            .with_backend(Recording {
                name: "ok",
                fail_with: None,
                seen: seen.clone(),
            });

        let event = AlertEvent::new(NotificationKind::Alert, "hello", 0, true);
        let report = dispatcher.dispatch(&event);

        assert_eq!(*seen.borrow(), vec!["broken:hello", "ok:hello"]);
        assert_eq!(report.delivered(), 1);
        let failed: Vec<_> = report.failed().map(|(name, e)| (name, e.code())).collect();
        assert_eq!(failed, vec![("broken", "status")]);
        assert!(report.any_delivered());
    }

    #[test]
    fn test_empty_dispatcher() {
        let report = Dispatcher::new().dispatch(&AlertEvent::new(NotificationKind::Info, "x", 1, false));
        assert!(report.outcomes.is_empty());
        assert!(!report.any_delivered());
    }

    #[test]
    fn test_missing_snapshot_is_skipped() {
        let event = AlertEvent::new(NotificationKind::Alert, "x", 0, true)
            .with_snapshot("/definitely/not/here/empty_1.jpg");
        assert!(event.read_snapshot().is_none());
    }

    #[test]
    fn test_build_dispatcher_from_config() {
        let agent = http_agent(Duration::from_secs(1));

        let config = SentinelConfig::default();
        assert!(build_dispatcher(&config, &agent).is_empty());

        let config = SentinelConfig {
            server_url: Some("http://localhost:5000/api/notifications".into()),
            telegram_token: Some("123:abc".into()),
            telegram_chat_id: Some("42".into()),
            ..SentinelConfig::default()
        };
        let dispatcher = build_dispatcher(&config, &agent);
        assert_eq!(dispatcher.backend_names(), vec!["webhook", "telegram"]);

        let config = SentinelConfig {
            telegram_token: Some("123:abc".into()),
            ..SentinelConfig::default()
        };
        assert!(build_dispatcher(&config, &agent).is_empty());

        // 只有空白的设置视为未配置
        let config = SentinelConfig {
            server_url: Some(" ".into()),
            telegram_token: Some("  ".into()),
            telegram_chat_id: Some("  ".into()),
            ..SentinelConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(build_dispatcher(&config, &agent).is_empty());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DispatchError::Transport("x".into()).code(), "transport");
        assert_eq!(DispatchError::Encode("x".into()).code(), "encode");
        assert_eq!(DispatchError::Config("x".into()).code(), "config");
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(DispatchError::from(io).code(), "io");
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("https://x/bot123:abc/send", "123:abc"), "https://x/bot***/send");
        assert_eq!(redact("plain", ""), "plain");
    }
}
