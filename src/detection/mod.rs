// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// - Detector:     统一检测接口 (帧 → 检测结果)
/// - YoloDetector: YOLOv8 ONNX 模型 (onnxruntime)
/// - types:        检测框 / 类别 / NMS
pub mod types;
pub mod yolo;

use anyhow::Result;

use crate::input::Frame;

pub use types::{count_people, non_max_suppression, BBox, Detection, PERSON_CLASS_ID};
pub use yolo::{YoloConfig, YoloDetector};

/// 统一的目标检测接口
pub trait Detector {
    /// 对单帧做检测, 坐标为原图坐标
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    fn name(&self) -> String;
}
