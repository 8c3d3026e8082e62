// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警快照与告警日志
//!
//! - SnapshotStore: `<dir>/empty_<unix秒>.jpg`
//! - AlertJournal:  每次告警追加一行 `<ctime> - Alert sent. Snapshot: <path>`

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use image::{ImageFormat, RgbImage};

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// 启动时创建快照目录
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建快照目录: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, unix_secs: i64) -> PathBuf {
        self.dir.join(format!("empty_{}.jpg", unix_secs))
    }

    pub fn save(&self, image: &RgbImage, unix_secs: i64) -> Result<PathBuf> {
        let path = self.path_for(unix_secs);
        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("保存快照失败: {}", path.display()))?;
        Ok(path)
    }
}

pub struct AlertJournal {
    path: PathBuf,
}

impl AlertJournal {
    /// 启动时创建日志所在目录
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("无法创建日志目录: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record<Tz>(&self, at: &DateTime<Tz>, snapshot: &Path) -> Result<()>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("无法打开告警日志: {}", self.path.display()))?;
        writeln!(file, "{}", journal_line(at, snapshot))
            .with_context(|| format!("写入告警日志失败: {}", self.path.display()))?;
        Ok(())
    }
}

/// C `ctime()` 格式, 例如 `Thu Oct  1 06:05:09 2026`
pub fn ctime<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%a %b %e %H:%M:%S %Y").to_string()
}

pub fn journal_line<Tz>(at: &DateTime<Tz>, snapshot: &Path) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{} - Alert sent. Snapshot: {}", ctime(at), snapshot.display())
}
