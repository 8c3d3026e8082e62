// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! IP 摄像头快照输入 - 每次读取都 GET 一张 JPEG

use std::io::Read;

use anyhow::{bail, Context, Result};

use super::{Frame, FrameSource};

/// 单张快照大小上限
const MAX_SNAPSHOT_BYTES: u64 = 32 * 1024 * 1024;

pub struct HttpSnapshot {
    url: String,
    agent: ureq::Agent,
    count: u64,
}

impl HttpSnapshot {
    pub fn new(url: impl Into<String>, agent: ureq::Agent) -> Self {
        Self {
            url: url.into(),
            agent,
            count: 0,
        }
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("获取快照失败: {}", self.url))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .context("读取快照数据失败")?;
        if bytes.is_empty() {
            bail!("快照为空: {}", self.url);
        }
        Ok(bytes)
    }
}

impl FrameSource for HttpSnapshot {
    fn read(&mut self) -> Result<Option<Frame>> {
        let bytes = self.fetch()?;
        let image = image::load_from_memory(&bytes)
            .context("快照解码失败")?
            .to_rgb8();

        let frame = Frame::new(image, self.count);
        self.count += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> String {
        format!("HTTP 快照 ({})", self.url)
    }
}
