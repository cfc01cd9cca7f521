// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/output/draw.rs - 违规标注绘制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::{output::EvidenceError, violation::Violation};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 3;
const ALERT_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

static BUILTIN_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // default font

/// 在帧上绘制违规框与标签，默认使用内嵌字体，可用 `with_font_file` 替换
pub struct EvidenceRenderer {
  font: Option<FontArc>,
  font_size: f32,
  alert_color: [u8; 3],
}

impl Default for EvidenceRenderer {
  fn default() -> Self {
    let font = FontArc::try_from_slice(BUILTIN_FONT)
      .map_err(|e| warn!("无法加载内嵌字体，标签将不含文字: {}", e))
      .ok();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      alert_color: ALERT_COLOR,
    }
  }
}

impl EvidenceRenderer {
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, EvidenceError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| EvidenceError::InvalidFont(path.display().to_string()))?;
    info!("加载标签字体: {}", path.display());
    self.font = Some(font);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn alert_color(&self) -> [u8; 3] {
    self.alert_color
  }

  /// 返回标注后的新图像，原帧不变
  pub fn draw_violations(&self, frame: &RgbImage, violations: &[Violation]) -> RgbImage {
    let mut image = frame.clone();
    for violation in violations {
      self.draw_bbox_with_label(&mut image, violation);
    }
    image
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, violation: &Violation) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let bbox = violation.bbox();
    let x_min = bbox.x1.clamp(0, w - 1);
    let y_min = bbox.y1.clamp(0, h - 1);
    let x_max = bbox.x2.clamp(0, w - 1);
    let y_max = bbox.y2.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.alert_color);
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{}: {:.2}", violation.description(), violation.confidence());
    let scale = PxScale::from(self.font_size);

    let (text_width, text_height) = match &self.font {
      Some(font) => {
        let (tw, th) = text_size(scale, font, &label);
        (tw as i32, (th as i32).max(LABEL_TEXT_HEIGHT))
      }
      None => (
        (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32,
        LABEL_TEXT_HEIGHT,
      ),
    };

    // 标签放在框的上方，贴近顶部时放在框内
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width == 0 || label_height == 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::violation::{BBox, DetectionRecord, Severity};

  fn violation(bbox: BBox) -> Violation {
    Violation::new(
      DetectionRecord {
        class_id: 1,
        class_name: "no_helmet".into(),
        confidence: 0.87,
        bbox,
      },
      "Worker without hard hat/helmet",
      "29 CFR 1926.100(a) - Head Protection",
      Severity::High,
      Utc::now(),
    )
  }

  #[test]
  fn draws_box_and_label_background() {
    let renderer = EvidenceRenderer::default();
    let frame = RgbImage::new(200, 200);
    let annotated = renderer.draw_violations(&frame, &[violation(BBox::new(50, 80, 150, 180).unwrap())]);

    let alert = Rgb(renderer.alert_color());
    // 边框
    assert_eq!(*annotated.get_pixel(50, 130), alert);
    assert_eq!(*annotated.get_pixel(52, 130), alert);
    assert_eq!(*annotated.get_pixel(100, 180), alert);
    // 框内部不填充
    assert_eq!(*annotated.get_pixel(100, 130), Rgb([0, 0, 0]));
    // 框上方的标签底色
    let label_pixels = (50..150)
      .flat_map(|x| (56..80).map(move |y| (x, y)))
      .filter(|&(x, y)| *annotated.get_pixel(x, y) == alert)
      .count();
    assert!(label_pixels > 100 * 24 / 2);
    // 原帧未被修改
    assert_eq!(*frame.get_pixel(50, 130), Rgb([0, 0, 0]));
  }

  #[test]
  fn label_text_is_drawn_with_builtin_font() {
    let renderer = EvidenceRenderer::default();
    assert!(renderer.has_font());

    let frame = RgbImage::new(200, 200);
    let annotated = renderer.draw_violations(&frame, &[violation(BBox::new(10, 80, 190, 180).unwrap())]);

    // 标签底色为纯红，文字像素带有绿色分量
    let text_pixels = (10..200)
      .flat_map(|x| (56..80).map(move |y| (x, y)))
      .filter(|&(x, y)| annotated.get_pixel(x, y)[1] > 128)
      .count();
    assert!(text_pixels > 0);
  }

  #[test]
  fn invalid_font_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      EvidenceRenderer::default().with_font_file(&path),
      Err(EvidenceError::InvalidFont(_))
    ));
  }

  #[test]
  fn box_outside_frame_is_clamped() {
    let renderer = EvidenceRenderer::default();
    let frame = RgbImage::new(40, 40);
    let annotated =
      renderer.draw_violations(&frame, &[violation(BBox::new(-10, 10, 100, 30).unwrap())]);
    assert_eq!(*annotated.get_pixel(0, 20), Rgb(renderer.alert_color()));
    assert_eq!(*annotated.get_pixel(39, 20), Rgb(renderer.alert_color()));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    let result = EvidenceRenderer::default().with_font_file(Path::new("/nonexistent/font.ttf"));
    assert!(matches!(result, Err(EvidenceError::IoError(_))));
  }
}
