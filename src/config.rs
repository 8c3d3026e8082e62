// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 运行配置 - 命令行 / 环境变量 / JSON 配置文件
//!
//! 优先级: 命令行 (含环境变量) > JSON 文件 > 默认值

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alert::telegram::DEFAULT_API_BASE;
use crate::detection::YoloConfig;
use crate::fan::FanSpec;
use crate::input::SourceSpec;

pub const DEFAULT_ALERT_MESSAGE: &str = "⚠️ Fans ON but no one is in the classroom!";

/// YOLOv8 最大下采样步长
const MIN_INPUT_SIZE: u32 = 32;

/// 教室无人值守监控参数
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "教室人员检测 - 无人但风扇开启时报警", long_about = None)]
pub struct Args {
    /// JSON 配置文件 (不存在时写入默认配置)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 输入源: 图片/目录, camera:N, rtsp://..., http(s):// 快照地址
    #[arg(short, long, env = "SENTINEL_SOURCE")]
    pub source: Option<String>,

    /// 图片目录播放完后从头开始
    #[arg(long = "loop")]
    pub loop_source: bool,

    /// YOLOv8 ONNX 模型
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    #[arg(long)]
    pub input_size: Option<u32>,

    /// 检测置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IOU阈值
    #[arg(long)]
    pub iou: Option<f32>,

    #[arg(long)]
    pub threads: Option<usize>,

    /// 无人且风扇开启持续多少秒后报警
    #[arg(long, env = "SENTINEL_ALERT_DELAY")]
    pub alert_delay: Option<u64>,

    #[arg(long)]
    pub message: Option<String>,

    /// 风扇状态: on, off, file:<path>, http(s)://...
    #[arg(long, env = "SENTINEL_FAN")]
    pub fan: Option<String>,

    /// 通知服务器地址 (POST JSON)
    #[arg(long, env = "SENTINEL_SERVER_URL")]
    pub server_url: Option<String>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    #[arg(long)]
    pub telegram_api: Option<String>,

    /// HTTP 请求超时 (秒)
    #[arg(long)]
    pub http_timeout: Option<u64>,

    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// 报警记录文件
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// 把标注画面写到该 JPEG 文件
    #[arg(long)]
    pub preview: Option<PathBuf>,

    /// 标注文字字体 (TTF/OTF), 不设置则只画框
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 每帧最小间隔 (毫秒)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// 发送一条测试通知后退出
    #[arg(long)]
    pub test_alert: bool,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// 合并配置文件与命令行, 并校验
    pub fn resolve(&self) -> Result<SentinelConfig> {
        let base = match &self.config {
            Some(path) => SentinelConfig::load_or_create(path)?,
            None => SentinelConfig::default(),
        };
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: SentinelConfig) -> SentinelConfig {
        if let Some(v) = &self.source {
            config.source = v.clone();
        }
        if self.loop_source {
            config.loop_source = true;
        }
        if let Some(v) = &self.model {
            config.model = v.clone();
        }
        if let Some(v) = self.input_size {
            config.input_size = v;
        }
        if let Some(v) = self.conf {
            config.conf_threshold = v;
        }
        if let Some(v) = self.iou {
            config.iou_threshold = v;
        }
        if let Some(v) = self.threads {
            config.threads = v;
        }
        if let Some(v) = self.alert_delay {
            config.alert_delay_secs = v;
        }
        if let Some(v) = &self.message {
            config.alert_message = v.clone();
        }
        if let Some(v) = &self.fan {
            config.fan = v.clone();
        }
        if self.server_url.is_some() {
            config.server_url = self.server_url.clone();
        }
        if self.telegram_token.is_some() {
            config.telegram_token = self.telegram_token.clone();
        }
        if self.telegram_chat_id.is_some() {
            config.telegram_chat_id = self.telegram_chat_id.clone();
        }
        if let Some(v) = &self.telegram_api {
            config.telegram_api = v.clone();
        }
        if let Some(v) = self.http_timeout {
            config.http_timeout_secs = v;
        }
        if let Some(v) = &self.snapshot_dir {
            config.snapshot_dir = v.clone();
        }
        if let Some(v) = &self.log_file {
            config.log_file = v.clone();
        }
        if self.preview.is_some() {
            config.preview = self.preview.clone();
        }
        if self.font.is_some() {
            config.font = self.font.clone();
        }
        if let Some(v) = self.interval_ms {
            config.interval_ms = v;
        }
        config
    }
}

/// 运行参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 输入 ===
    pub source: String,
    pub loop_source: bool,
    pub interval_ms: u64,

    // === 检测 ===
    pub model: PathBuf,
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub threads: usize,

    // === 报警 ===
    pub alert_delay_secs: u64,
    pub alert_message: String,
    pub fan: String,

    // === 通知 ===
    pub server_url: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api: String,
    pub http_timeout_secs: u64,

    // === 输出 ===
    pub snapshot_dir: PathBuf,
    pub log_file: PathBuf,
    pub preview: Option<PathBuf>,
    pub font: Option<PathBuf>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        let detector = YoloConfig::default();
        Self {
            source: "frames/".to_string(),
            loop_source: false,
            interval_ms: 0,

            model: detector.model,
            input_size: detector.input_size,
            conf_threshold: detector.conf,
            iou_threshold: detector.iou,
            threads: detector.threads,

            alert_delay_secs: 300,
            alert_message: DEFAULT_ALERT_MESSAGE.to_string(),
            fan: "on".to_string(),

            server_url: None,
            telegram_token: None,
            telegram_chat_id: None,
            telegram_api: DEFAULT_API_BASE.to_string(),
            http_timeout_secs: 10,

            snapshot_dir: PathBuf::from("snapshots"),
            log_file: PathBuf::from("logs/alerts.log"),
            preview: None,
            font: None,
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置; 解析失败视为错误
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("配置文件解析失败: {}", path.display()))?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        info!("✅ 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 文件不存在时写入默认配置
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        warn!("⚠️  配置文件 {} 不存在, 写入默认配置", path.display());
        let config = Self::default();
        if let Err(e) = config.save(path) {
            warn!("⚠️  默认配置写入失败: {:#}", e);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size < MIN_INPUT_SIZE {
            bail!("input_size 不能小于 {}: {}", MIN_INPUT_SIZE, self.input_size);
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            bail!("置信度阈值必须在 [0, 1] 内: {}", self.conf_threshold);
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            bail!("IOU阈值必须在 [0, 1] 内: {}", self.iou_threshold);
        }
        if self.http_timeout_secs == 0 {
            bail!("HTTP 超时必须大于 0");
        }
        match (non_empty(&self.telegram_token), non_empty(&self.telegram_chat_id)) {
            (Some(_), None) => bail!("设置了 Telegram token 但缺少 chat id"),
            (None, Some(_)) => bail!("设置了 Telegram chat id 但缺少 token"),
            _ => {}
        }
        self.source_spec()?;
        self.fan_spec()?;
        Ok(())
    }

    pub fn alert_delay(&self) -> Duration {
        Duration::from_secs(self.alert_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn source_spec(&self) -> Result<SourceSpec> {
        self.source.parse()
    }

    pub fn fan_spec(&self) -> Result<FanSpec> {
        self.fan.parse()
    }

    pub fn yolo_config(&self) -> YoloConfig {
        YoloConfig {
            model: self.model.clone(),
            input_size: self.input_size,
            conf: self.conf_threshold,
            iou: self.iou_threshold,
            threads: self.threads.max(1),
            ..YoloConfig::default()
        }
    }

    pub fn print_summary(&self) {
        info!("📹 输入源: {}{}", self.source, if self.loop_source { " (循环)" } else { "" });
        info!(
            "📦 检测模型: {} ({}px, conf={}, iou={})",
            self.model.display(),
            self.input_size,
            self.conf_threshold,
            self.iou_threshold
        );
        info!("🌀 风扇状态: {}", self.fan);
        info!("⏱️  报警延迟: {}s", self.alert_delay_secs);
        match non_empty(&self.server_url) {
            Some(url) => info!("🌐 通知服务器: {}", url),
            None => info!("🌐 通知服务器: 未配置"),
        }
        match (non_empty(&self.telegram_token), non_empty(&self.telegram_chat_id)) {
            (Some(token), Some(chat)) => info!("✈️  Telegram: {} → {}", mask(token), chat),
            _ => info!("✈️  Telegram: 未配置"),
        }
        info!("🖼️  快照目录: {}", self.snapshot_dir.display());
        info!("📝 报警记录: {}", self.log_file.display());
    }
}

/// 去掉首尾空白后非空才算已设置
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// 只保留末尾 4 位
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
