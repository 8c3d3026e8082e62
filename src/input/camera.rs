// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 摄像头输入模块 - 本地摄像头 / RTSP 流
//!
//! FFmpeg 解码在独立调度线程中运行, 解码滤镜把 YUV420P 转成 RGB 后
//! 通过有界通道交给主循环。通道满时解码端丢弃新帧, 读取端每次取走
//! 通道中积压的全部画面并只保留最后一帧, 时间戳取自解码时刻。

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame as AvFrame, Input};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::{Frame, FrameSource, SourceSpec};

/// 首帧等待时间 (打开失败判定)
const OPEN_TIMEOUT: Duration = Duration::from_secs(15);
/// 运行中读帧超时 (视为读取失败)
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// 解码线程产出的一帧及其解码时刻
struct Decoded {
    image: RgbImage,
    captured_at: DateTime<Local>,
    instant: Instant,
}

impl Decoded {
    fn now(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Local::now(),
            instant: Instant::now(),
        }
    }
}

pub struct CameraSource {
    name: String,
    rx: Receiver<Decoded>,
    pending: Option<Decoded>,
    count: u64,
}

impl CameraSource {
    pub fn open(spec: &SourceSpec) -> Result<Self> {
        let (url, format) = match spec {
            SourceSpec::Camera(index) => (format_camera_url(*index), Some(camera_format())),
            SourceSpec::Rtsp(url) => (url.clone(), None),
            other => bail!("不是摄像头输入源: {}", other),
        };
        info!("📷 打开视频源: {}", url);

        let (tx, rx) = bounded::<Decoded>(2);
        let decode_url = url.clone();
        thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || decode(&decode_url, format, tx))?;

        // 等待首帧, 确认摄像头可用
        let first = match rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(decoded) => decoded,
            Err(RecvTimeoutError::Timeout) => bail!("摄像头打开超时: {}", url),
            Err(RecvTimeoutError::Disconnected) => bail!("无法打开摄像头: {}", url),
        };
        info!(
            "✅ 摄像头连接成功 ({}x{})",
            first.image.width(),
            first.image.height()
        );

        Ok(Self {
            name: url,
            rx,
            pending: Some(first),
            count: 0,
        })
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        let oldest = match self.pending.take() {
            Some(decoded) => decoded,
            None => self.rx.recv_timeout(READ_TIMEOUT).map_err(|e| match e {
                RecvTimeoutError::Timeout => anyhow!("读取视频帧超时"),
                RecvTimeoutError::Disconnected => anyhow!("视频流已断开"),
            })?,
        };
        let (decoded, skipped) = newest(&self.rx, oldest);
        if skipped > 0 {
            debug!("跳过 {} 帧积压画面", skipped);
        }

        let frame = Frame::captured(decoded.image, self.count, decoded.captured_at, decoded.instant);
        self.count += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> String {
        format!("摄像头 ({})", self.name)
    }
}

/// 取走通道中已有的画面, 返回最新一帧与跳过的帧数
fn newest<T>(rx: &Receiver<T>, mut latest: T) -> (T, u64) {
    let mut skipped = 0;
    while let Ok(next) = rx.try_recv() {
        latest = next;
        skipped += 1;
    }
    (latest, skipped)
}

/// 格式化摄像头URL - 根据平台选择
fn format_camera_url(index: usize) -> String {
    #[cfg(target_os = "windows")]
    {
        let devices = ez_ffmpeg::device::get_input_video_devices().unwrap_or_default();
        match devices.get(index) {
            Some(name) => format!("video={}", name),
            None => format!("video={}", index),
        }
    }
    #[cfg(target_os = "linux")]
    {
        format!("/dev/video{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        format!("{}", index)
    }
}

fn camera_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(target_os = "linux")]
    {
        "v4l2"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        "video4linux2"
    }
}

/// 解码线程: 运行直到视频流结束或主循环退出
fn decode(url: &str, format: Option<&'static str>, tx: Sender<Decoded>) {
    let filter = RgbFilter::new(tx);

    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = match format {
        Some(format) => Input::new(url).set_format(format),
        None => Input::new(url).set_input_opts([("rtsp_transport", "tcp")].into()),
    };

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_descs(["format=yuv420p"].into())
        .output(out)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!("❌ 视频源构建失败: {}", e);
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(s) => s,
        Err(e) => {
            error!("❌ 视频源启动失败: {}", e);
            return;
        }
    };

    let _ = sch.wait();
    info!("📹 解码循环结束");
}

/// FFmpeg 滤镜: YUV420P → RGB
#[derive(Clone)]
struct RgbFilter {
    tx: Sender<Decoded>,
    dropped: u64,
    last: Instant,
}

impl RgbFilter {
    fn new(tx: Sender<Decoded>) -> Self {
        Self {
            tx,
            dropped: 0,
            last: Instant::now(),
        }
    }
}

impl FrameFilter for RgbFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            return Ok(None);
        }

        let image = unsafe {
            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as usize, raw.height as usize);
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                return Ok(None);
            }
            let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                return Ok(None);
            }
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_stride < w || uv_stride < w / 2 {
                return Ok(None);
            }

            let mut rgb = vec![0u8; w * h * 3];
            yuv420p_to_rgb(y_plane, u_plane, v_plane, y_stride, uv_stride, &mut rgb, w, h);
            match RgbImage::from_raw(w as u32, h as u32, rgb) {
                Some(img) => img,
                None => return Ok(None),
            }
        };

        match self.tx.try_send(Decoded::now(image)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            // 主循环已退出
            Err(TrySendError::Disconnected(_)) => return Err("receiver closed".to_string()),
        }

        if self.last.elapsed() >= Duration::from_secs(60) && self.dropped > 0 {
            debug!("📺 最近一分钟丢弃 {} 帧 (主循环较慢)", self.dropped);
            self.dropped = 0;
            self.last = Instant::now();
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        warn!("📹 解码滤镜退出");
    }
}

/// 标量版本 YUV420P → RGB
#[inline]
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 3;
        }
    }
}
