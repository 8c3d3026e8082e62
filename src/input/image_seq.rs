// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 图片序列输入 - 单张图片或目录中的全部图片 (按文件名排序)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use super::{Frame, FrameSource};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "webp", "tif"];

pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    count: u64,
}

impl ImageSequence {
    pub fn open(path: &Path, looping: bool) -> Result<Self> {
        let paths = if path.is_dir() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("无法读取图片目录: {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("输入源不存在: {}", path.display());
        };

        if paths.is_empty() {
            bail!("目录中没有图片: {}", path.display());
        }

        info!("🖼️ 图片序列: {} 张{}", paths.len(), if looping { " (循环)" } else { "" });
        Ok(Self {
            paths,
            cursor: 0,
            looping,
            count: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.cursor >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        let image = image::open(path)
            .with_context(|| format!("读取图片失败: {}", path.display()))?
            .to_rgb8();
        self.cursor += 1;

        let frame = Frame::new(image, self.count);
        self.count += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> String {
        format!("图片序列 ({} 张)", self.paths.len())
    }
}
