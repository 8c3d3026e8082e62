// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 画面输出 (Frame Sink)
//!
//! 无窗口环境下把最新的标注画面写到一个 JPEG 文件, 供外部查看器刷新显示。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};

pub trait FrameSink {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;
}

/// 丢弃所有画面
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// 每 `every` 帧覆盖写一次预览文件 (先写临时文件再重命名)
pub struct PreviewFile {
    path: PathBuf,
    tmp: PathBuf,
    every: u64,
    count: u64,
}

impl PreviewFile {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建预览目录: {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp.jpg");
        Ok(Self {
            path,
            tmp,
            every: every.max(1),
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PreviewFile {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        let due = self.count % self.every == 0;
        self.count += 1;
        if !due {
            return Ok(());
        }

        frame
            .save_with_format(&self.tmp, ImageFormat::Jpeg)
            .with_context(|| format!("写入预览失败: {}", self.tmp.display()))?;
        std::fs::rename(&self.tmp, &self.path)
            .with_context(|| format!("更新预览失败: {}", self.path.display()))?;
        Ok(())
    }
}
