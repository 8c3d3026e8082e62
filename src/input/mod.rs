// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// 在主循环中同步读取, 每次返回一帧
/// - ImageSequence: 单张图片或图片目录 (离线回放)
/// - HttpSnapshot:  IP 摄像头 JPEG 快照地址轮询
/// - CameraSource:  本地摄像头 / RTSP (需要 `camera` 特性)
pub mod image_seq;
pub mod snapshot;

#[cfg(feature = "camera")]
pub mod camera;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use image::RgbImage;

pub use image_seq::ImageSequence;
pub use snapshot::HttpSnapshot;

#[cfg(feature = "camera")]
pub use camera::CameraSource;

/// 一帧图像, 仅在一次循环内由主循环独占
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// 采集时的墙钟时间 (快照命名 / 日志)
    pub captured_at: DateTime<Local>,
    /// 采集时的单调时钟 (状态机计时)
    pub instant: Instant,
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self::captured(image, index, Local::now(), Instant::now())
    }

    /// 采集时间已知 (例如解码线程打的时间戳)
    pub fn captured(
        image: RgbImage,
        index: u64,
        captured_at: DateTime<Local>,
        instant: Instant,
    ) -> Self {
        Self {
            image,
            captured_at,
            instant,
            index,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("size", &self.image.dimensions())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// 帧来源
pub trait FrameSource {
    /// `Ok(None)`: 视频流结束; `Err`: 读取失败 (致命)
    fn read(&mut self) -> Result<Option<Frame>>;

    fn name(&self) -> String;
}

/// 输入源描述 (命令行 `--source`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// `camera:N`
    Camera(usize),
    /// `rtsp://...`
    Rtsp(String),
    /// `http(s)://...` JPEG 快照地址
    Snapshot(String),
    /// 图片文件或目录
    Path(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("输入源为空");
        }
        if let Some(index) = s.strip_prefix("camera:") {
            return match index.parse::<usize>() {
                Ok(i) => Ok(SourceSpec::Camera(i)),
                Err(_) => bail!("无效的摄像头编号: {}", index),
            };
        }
        if s.starts_with("rtsp://") || s.starts_with("rtsps://") {
            return Ok(SourceSpec::Rtsp(s.to_string()));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(SourceSpec::Snapshot(s.to_string()));
        }
        Ok(SourceSpec::Path(PathBuf::from(s)))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Camera(i) => write!(f, "camera:{}", i),
            SourceSpec::Rtsp(url) | SourceSpec::Snapshot(url) => write!(f, "{}", url),
            SourceSpec::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// 打开输入源; 失败即为致命错误
pub fn open_source(
    spec: &SourceSpec,
    looping: bool,
    agent: &ureq::Agent,
) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Path(path) => Ok(Box::new(ImageSequence::open(path, looping)?)),
        SourceSpec::Snapshot(url) => Ok(Box::new(HttpSnapshot::new(url, agent.clone()))),
        #[cfg(feature = "camera")]
        SourceSpec::Camera(_) | SourceSpec::Rtsp(_) => Ok(Box::new(CameraSource::open(spec)?)),
        #[cfg(not(feature = "camera"))]
        SourceSpec::Camera(_) | SourceSpec::Rtsp(_) => {
            bail!("输入源 {} 需要启用 camera 特性 (cargo build --features camera)", spec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_spec() {
        assert_eq!("camera:0".parse::<SourceSpec>().unwrap(), SourceSpec::Camera(0));
        assert_eq!(
            "rtsp://10.0.0.2/stream".parse::<SourceSpec>().unwrap(),
            SourceSpec::Rtsp("rtsp://10.0.0.2/stream".into())
        );
        assert_eq!(
            "http://cam.local/snapshot.jpg".parse::<SourceSpec>().unwrap(),
            SourceSpec::Snapshot("http://cam.local/snapshot.jpg".into())
        );
        assert_eq!(
            " frames/ ".parse::<SourceSpec>().unwrap(),
            SourceSpec::Path(PathBuf::from("frames/"))
        );
        assert!("camera:x".parse::<SourceSpec>().is_err());
        assert!("".parse::<SourceSpec>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["camera:2", "rtsp://a/b", "https://c/d.jpg", "frames"] {
            assert_eq!(s.parse::<SourceSpec>().unwrap().to_string(), s);
        }
    }

    #[cfg(not(feature = "camera"))]
    #[test]
    fn test_camera_requires_feature() {
        let agent = crate::alert::http_agent(std::time::Duration::from_secs(1));
        let err = open_source(&SourceSpec::Camera(0), false, &agent).err().unwrap();
        assert!(err.to_string().contains("camera"));
    }

    #[test]
    fn test_frame_keeps_capture_time() {
        let at = Local::now() - chrono::Duration::seconds(3);
        let instant = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let frame = Frame::captured(RgbImage::new(2, 2), 7, at, instant);
        assert_eq!(frame.captured_at, at);
        assert_eq!(frame.instant, instant);
        assert_eq!(frame.index, 7);
    }
}
