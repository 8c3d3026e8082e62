// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 画面标注: 人员框 + 人数 / 风扇状态文字

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::Detection;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;

pub struct Overlay {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(28.0),
        }
    }
}

impl Overlay {
    /// 无字体时只画框, 不画文字
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("读取字体失败: {}", path.display()))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow::anyhow!("字体解析失败 {}: {}", path.display(), e))?;
        Ok(Self {
            font: Some(font),
            ..Self::default()
        })
    }

    /// 返回标注后的副本, 原图不变
    pub fn annotate(
        &self,
        image: &RgbImage,
        detections: &[Detection],
        person_count: u32,
        fan_on: bool,
    ) -> RgbImage {
        let mut canvas = image.clone();

        for det in detections.iter().filter(|d| d.is_person()) {
            let b = det.bbox;
            for t in 0..BOX_THICKNESS {
                let x = b.x1 as i32 + t;
                let y = b.y1 as i32 + t;
                let w = (b.width() as i32 - 2 * t).max(1) as u32;
                let h = (b.height() as i32 - 2 * t).max(1) as u32;
                draw_hollow_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), GREEN);
            }
        }

        if let Some(font) = &self.font {
            let count_text = format!("People Count: {}", person_count);
            draw_text_mut(&mut canvas, RED, 10, 10, self.scale, font, &count_text);

            let (fan_text, fan_color) = if fan_on {
                ("Fan Status: ON", RED)
            } else {
                ("Fan Status: OFF", GREEN)
            };
            draw_text_mut(&mut canvas, fan_color, 10, 42, self.scale, font, fan_text);
        }

        canvas
    }
}
