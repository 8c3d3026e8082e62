// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器
// 包含: 模型加载、预处理、推理、后处理

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::debug;

use super::types::{non_max_suppression, BBox, Detection, COCO_CLASSES};
use super::Detector;
use crate::input::Frame;

/// YOLOv8推理输入尺寸
pub const INF_SIZE: u32 = 640;

const CXYWH_OFFSET: usize = 4;
const PAD_VALUE: f32 = 144.0 / 255.0;

/// 检测器配置
#[derive(Debug, Clone)]
pub struct YoloConfig {
    pub model: PathBuf,
    pub input_size: u32,
    pub conf: f32,
    pub iou: f32,
    pub threads: usize,
    /// 模型类别数, 输出通道为 4 + num_classes
    pub num_classes: usize,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/yolov8n.onnx"),
            input_size: INF_SIZE,
            conf: 0.25,
            iou: 0.45,
            threads: 4,
            num_classes: COCO_CLASSES.len(),
        }
    }
}

pub struct YoloDetector {
    session: Session,
    output_name: String,
    config: YoloConfig,
}

impl YoloDetector {
    pub fn new(config: YoloConfig) -> Result<Self> {
        if !config.model.exists() {
            bail!("模型文件不存在: {}", config.model.display());
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.threads)?
            .commit_from_file(&config.model)
            .with_context(|| format!("加载模型失败: {}", config.model.display()))?;

        Ok(Self {
            session,
            output_name: "output0".to_string(),
            config,
        })
    }

}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let size = self.config.input_size;
        let (w0, h0) = frame.image.dimensions();

        let t_pre = Instant::now();
        let (input, ratio) = preprocess(&frame.image, size);
        let input = Value::from_array(input)?;
        debug!("[Preprocess]: {:?}", t_pre.elapsed());

        let t_run = Instant::now();
        let outputs = self.session.run(ort::inputs![input])?;
        let output = outputs
            .get(self.output_name.as_str())
            .with_context(|| format!("模型缺少输出: {}", self.output_name))?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        debug!("[Inference]: {:?}", t_run.elapsed());

        let mut detections = decode_predictions(
            data,
            &dims,
            self.config.num_classes,
            ratio,
            w0 as f32,
            h0 as f32,
            self.config.conf,
        )?;
        non_max_suppression(&mut detections, self.config.iou);
        Ok(detections)
    }

    fn name(&self) -> String {
        format!("YOLOv8 ({})", self.config.model.display())
    }
}

/// 等比缩放到左上角, 其余区域填充灰色; 返回 NCHW 张量和缩放比例
pub fn preprocess(image: &RgbImage, size: u32) -> (Array<f32, ndarray::Ix4>, f32) {
    let (w0, h0) = image.dimensions();
    let ratio = (size as f32 / w0 as f32).min(size as f32 / h0 as f32);
    let w_new = ((w0 as f32 * ratio).round() as u32).clamp(1, size);
    let h_new = ((h0 as f32 * ratio).round() as u32).clamp(1, size);

    let resized = imageops::resize(image, w_new, h_new, FilterType::Triangle);

    let mut ys = Array::from_elem((1, 3, size as usize, size as usize), PAD_VALUE);
    for (x, y, rgb) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = r as f32 / 255.0;
        ys[[0, 1, y, x]] = g as f32 / 255.0;
        ys[[0, 2, y, x]] = b as f32 / 255.0;
    }
    (ys, ratio)
}

/// 解码 YOLOv8 输出 `[1, 4 + nc, anchors]`
///
/// 只有第一维不等于 `4 + nc` 而第二维等于时才按转置的 `[1, anchors, 4 + nc]` 读取;
/// 锚点数可能少于通道数 (小输入尺寸), 不能按大小猜布局。
#[allow(clippy::too_many_arguments)]
pub fn decode_predictions(
    data: &[f32],
    dims: &[usize],
    num_classes: usize,
    ratio: f32,
    width_original: f32,
    height_original: f32,
    conf: f32,
) -> Result<Vec<Detection>> {
    let (rows, cols) = match dims {
        [1, a, b] => (*a, *b),
        [a, b] => (*a, *b),
        _ => bail!("无法识别的输出形状: {:?}", dims),
    };
    if data.len() < rows * cols {
        bail!("输出数据长度 {} 与形状 {:?} 不符", data.len(), dims);
    }

    let channels = CXYWH_OFFSET + num_classes;
    if num_classes == 0 {
        bail!("类别数为 0");
    }
    let transposed = if rows == channels {
        false
    } else if cols == channels {
        true
    } else {
        bail!("输出形状 {:?} 与类别数 {} 不符", dims, num_classes);
    };
    let anchors = if transposed { rows } else { cols };
    let at = |c: usize, i: usize| {
        if transposed {
            data[i * channels + c]
        } else {
            data[c * anchors + i]
        }
    };

    let mut detections = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (CXYWH_OFFSET..channels)
            .map(|c| (c - CXYWH_OFFSET, at(c, i)))
            .fold((0, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });

        if confidence < conf {
            continue;
        }

        let bbox = BBox::from_cxcywh(
            at(0, i) / ratio,
            at(1, i) / ratio,
            at(2, i) / ratio,
            at(3, i) / ratio,
        )
        .clamp(width_original, height_original);

        detections.push(Detection::new(class_id, confidence, bbox));
    }
    Ok(detections)
}
