// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 风扇状态来源
//!
//! - `on` / `off`:    固定值
//! - `file:<path>`:   每帧读取文件内容 (on/off/1/0/true/false)
//! - `http(s)://...`: 每帧 GET, 支持 `{"fanStatus": bool}` 或纯文本

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

pub trait FanStatusSource {
    fn read(&mut self) -> Result<bool>;

    fn name(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanSpec {
    Fixed(bool),
    File(PathBuf),
    Http(String),
}

impl FromStr for FanSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("file:") {
            if path.is_empty() {
                bail!("风扇状态文件路径为空");
            }
            return Ok(FanSpec::File(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(FanSpec::Http(s.to_string()));
        }
        parse_fan_text(s)
            .map(FanSpec::Fixed)
            .ok_or_else(|| anyhow!("无效的风扇状态来源: {} (on/off/file:<path>/http://...)", s))
    }
}

impl fmt::Display for FanSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanSpec::Fixed(true) => write!(f, "on"),
            FanSpec::Fixed(false) => write!(f, "off"),
            FanSpec::File(p) => write!(f, "file:{}", p.display()),
            FanSpec::Http(url) => write!(f, "{}", url),
        }
    }
}

/// 解析风扇状态文本
pub fn parse_fan_text(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        return value
            .get("fanStatus")
            .or_else(|| value.get("fan_status"))
            .or_else(|| value.get("on"))
            .and_then(|v| v.as_bool());
    }
    match text.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Some(true),
        "off" | "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub struct FixedFan(pub bool);

impl FanStatusSource for FixedFan {
    fn read(&mut self) -> Result<bool> {
        Ok(self.0)
    }

    fn name(&self) -> String {
        format!("固定 ({})", if self.0 { "ON" } else { "OFF" })
    }
}

pub struct FileFan {
    path: PathBuf,
}

impl FileFan {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FanStatusSource for FileFan {
    fn read(&mut self) -> Result<bool> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("读取风扇状态文件失败: {}", self.path.display()))?;
        parse_fan_text(&text)
            .ok_or_else(|| anyhow!("无法识别的风扇状态: {:?}", text.trim()))
    }

    fn name(&self) -> String {
        format!("文件 ({})", self.path.display())
    }
}

pub struct HttpFan {
    url: String,
    agent: ureq::Agent,
}

impl HttpFan {
    pub fn new(url: impl Into<String>, agent: ureq::Agent) -> Self {
        Self {
            url: url.into(),
            agent,
        }
    }
}

impl FanStatusSource for HttpFan {
    fn read(&mut self) -> Result<bool> {
        let text = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("查询风扇状态失败: {}", self.url))?
            .into_string()
            .context("读取风扇状态应答失败")?;
        parse_fan_text(&text)
            .ok_or_else(|| anyhow!("无法识别的风扇状态: {:?}", text.trim()))
    }

    fn name(&self) -> String {
        format!("HTTP ({})", self.url)
    }
}

pub fn open_fan_source(spec: &FanSpec, agent: &ureq::Agent) -> Box<dyn FanStatusSource> {
    match spec {
        FanSpec::Fixed(on) => Box::new(FixedFan(*on)),
        FanSpec::File(path) => Box::new(FileFan::new(path)),
        FanSpec::Http(url) => Box::new(HttpFan::new(url, agent.clone())),
    }
}
