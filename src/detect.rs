// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/detect.rs - 检测适配与违规检测入口
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  classify::classify,
  frame::Frame,
  model::{Detector, PredictParams},
  perf::{PerformanceSnapshot, PerformanceTracker},
  preprocess::{PreprocessError, Prepared, ResizeSettings, prepare},
  violation::{BBox, DetectionRecord, Violation, ViolationCatalog},
};

const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("输入帧无效: {0}")]
  InvalidFrame(#[from] PreprocessError),
  #[error("检测器不可用: {0}")]
  Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 单次推理的适配结果
#[derive(Debug, Default)]
pub struct AdapterOutput {
  pub detections: Vec<DetectionRecord>,
  /// 映射回原始坐标后退化而被丢弃的框
  pub degenerate: usize,
  /// 检测器超出数量上限而被截断的框
  pub truncated: usize,
  /// 低于置信度下限而被丢弃的框
  pub below_floor: usize,
}

/// 将送入模型图像上的框映射回原始帧的整数像素坐标
pub fn remap_bbox(bbox: &[f32; 4], scale_x: f64, scale_y: f64) -> Option<BBox> {
  let scaled = [
    bbox[0] as f64 * scale_x,
    bbox[1] as f64 * scale_y,
    bbox[2] as f64 * scale_x,
    bbox[3] as f64 * scale_y,
  ];
  if scaled.iter().any(|v| !v.is_finite()) {
    return None;
  }

  let [x1, y1, x2, y2] = scaled.map(|v| v.round() as i32);
  BBox::new(x1, y1, x2, y2)
}

/// 检测适配器：调用检测器一次，校验上限并做坐标校正
#[derive(Debug, Clone)]
pub struct DetectionAdapter {
  params: PredictParams,
}

impl DetectionAdapter {
  pub fn new(params: PredictParams) -> Self {
    Self { params }
  }

  pub fn params(&self) -> &PredictParams {
    &self.params
  }

  /// 无论成功与否都会把耗时记入 `tracker`
  pub fn infer<D: Detector>(
    &self,
    detector: &mut D,
    prepared: &Prepared<'_>,
    tracker: &mut PerformanceTracker,
  ) -> Result<AdapterOutput, DetectError> {
    let now = Instant::now();
    let result = detector.predict(&prepared.image, &self.params);
    let elapsed = now.elapsed();
    tracker.record(elapsed);
    debug!("推理完成，耗时: {:.2?}", elapsed);

    let mut raw = result.map_err(|e| DetectError::Unavailable(Box::new(e)))?;

    let mut output = AdapterOutput::default();
    if raw.len() > self.params.max_detections {
      output.truncated = raw.len() - self.params.max_detections;
      warn!(
        "检测器返回 {} 个框，超过上限 {}，截断",
        raw.len(),
        self.params.max_detections
      );
      raw.truncate(self.params.max_detections);
    }

    let labels = detector.labels();
    for det in raw {
      if det.confidence < self.params.confidence_floor {
        output.below_floor += 1;
        continue;
      }

      let Some(bbox) = remap_bbox(&det.bbox, prepared.scale_x, prepared.scale_y) else {
        output.degenerate += 1;
        continue;
      };

      let class_name = labels
        .get(det.class_id as usize)
        .map(String::as_str)
        .unwrap_or(UNKNOWN_LABEL)
        .to_string();
      output.detections.push(DetectionRecord {
        class_id: det.class_id,
        class_name,
        confidence: det.confidence,
        bbox,
      });
    }

    if output.degenerate > 0 {
      debug!("丢弃 {} 个退化框", output.degenerate);
    }

    Ok(output)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorSettings {
  pub resize: ResizeSettings,
  pub params: PredictParams,
}

/// 预处理、推理、分类三步合一的违规检测器
pub struct ViolationDetector<D> {
  detector: D,
  resize: ResizeSettings,
  adapter: DetectionAdapter,
  catalog: ViolationCatalog,
  tracker: PerformanceTracker,
  dropped_boxes: u64,
}

impl<D: Detector> ViolationDetector<D> {
  pub fn new(detector: D, catalog: ViolationCatalog, settings: DetectorSettings) -> Self {
    let detector = Self {
      detector,
      resize: settings.resize,
      adapter: DetectionAdapter::new(settings.params),
      catalog,
      tracker: PerformanceTracker::new(),
      dropped_boxes: 0,
    };
    if detector.recognized_classes().is_empty() {
      warn!("检测器类别表中没有任何违规类别，将不会产生违规记录");
    }
    detector
  }

  /// 违规目录中能被检测器类别表识别的类别
  pub fn recognized_classes(&self) -> Vec<&str> {
    let labels = self.detector.labels();
    self
      .catalog
      .class_names()
      .filter(|class| labels.iter().any(|label| label == class))
      .collect()
  }

  /// 返回该帧全部违规，时间戳取帧的捕获时刻
  pub fn detect_violations(&mut self, frame: &Frame) -> Result<Vec<Violation>, DetectError> {
    let prepared = prepare(&frame.image, &self.resize)?;
    let output = self
      .adapter
      .infer(&mut self.detector, &prepared, &mut self.tracker)?;
    self.dropped_boxes += output.degenerate as u64;

    Ok(classify(&output.detections, &self.catalog, frame.timestamp))
  }

  pub fn get_performance_stats(&self) -> Option<PerformanceSnapshot> {
    self.tracker.snapshot()
  }

  pub fn dropped_boxes(&self) -> u64 {
    self.dropped_boxes
  }

  pub fn catalog(&self) -> &ViolationCatalog {
    &self.catalog
  }

  pub fn detector(&self) -> &D {
    &self.detector
  }
}
