// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use crate::model::RawDetection;

/// 按类别进行非极大值抑制，结果按置信度降序，最多保留 `max_detections` 个
pub fn non_max_suppression(
  mut detections: Vec<RawDetection>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<RawDetection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut result: Vec<RawDetection> = Vec::new();
  for det in detections {
    if result.len() >= max_detections {
      break;
    }
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == det.class_id && iou(&kept.bbox, &det.bbox) >= iou_threshold);
    if !suppressed {
      result.push(det);
    }
  }

  result
}

/// 计算两个 [x_min, y_min, x_max, y_max] 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(class_id: u32, confidence: f32, bbox: [f32; 4]) -> RawDetection {
    RawDetection {
      class_id,
      confidence,
      bbox,
    }
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    assert!((iou(&a, &[5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn overlapping_boxes_of_same_class_are_suppressed() {
    let kept = non_max_suppression(
      vec![
        det(1, 0.6, [0.0, 0.0, 10.0, 10.0]),
        det(1, 0.9, [1.0, 1.0, 11.0, 11.0]),
        det(2, 0.5, [1.0, 1.0, 11.0, 11.0]),
      ],
      0.45,
      10,
    );
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].class_id, 2);
  }

  #[test]
  fn result_is_capped() {
    let many = (0..5)
      .map(|i| det(0, 0.5 + i as f32 * 0.01, [i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0]))
      .collect();
    let kept = non_max_suppression(many, 0.45, 3);
    assert_eq!(kept.len(), 3);
    assert!(kept[0].confidence > kept[2].confidence);
  }
}
