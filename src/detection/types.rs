// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测结果数据结构
//! Detection data structures

/// COCO 类别中 "person" 的编号
pub const PERSON_CLASS_ID: usize = 0;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// 类别编号 → 名称, 越界时返回 "unknown"
pub fn class_label(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("unknown")
}

/// 检测框 (xyxy, 原图坐标)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 由中心点和宽高构造
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// 裁剪到图像范围内
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.x1.clamp(0., width),
            self.y1.clamp(0., height),
            self.x2.clamp(0., width),
            self.y2.clamp(0., height),
        )
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0. {
            0.
        } else {
            inter / union
        }
    }
}

/// 单个检测目标 (每帧临时值, 不持久化)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: &'static str,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_id: usize, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            label: class_label(class_id),
            confidence,
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// 统计画面中的人数
pub fn count_people(detections: &[Detection]) -> u32 {
    detections.iter().filter(|d| d.is_person()).count() as u32
}

/// 按类别做非极大值抑制, 结果按置信度降序
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id == xs[index].class_id
                && xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
