// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/model.rs - 检测模型
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

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 推理精度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
  #[default]
  Full,
  Half,
}

/// 每次推理传给检测器的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictParams {
  pub confidence_floor: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  pub precision: Precision,
}

impl Default for PredictParams {
  fn default() -> Self {
    Self {
      confidence_floor: 0.25,
      iou_threshold: 0.45,
      max_detections: 50,
      precision: Precision::Full,
    }
  }
}

/// 检测器原始输出，bbox 为送入模型的图像上的像素坐标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

/// 目标检测器
///
/// 实现方负责置信度过滤、NMS 以及数量上限；调用方仍会再次校验上限。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 类别编号到类别名的映射
  fn labels(&self) -> &[String];

  fn predict(
    &mut self,
    image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<RawDetection>, Self::Error>;
}

pub mod nms;

mod replay;
pub use self::replay::{ReplayDetector, ReplayError};

#[cfg(feature = "model_tract")]
mod yolov8;
#[cfg(feature = "model_tract")]
pub use self::yolov8::{Yolov8Detector, Yolov8Error};

/// 解析 `labels=a,b,c` 形式的类别表
pub(crate) fn parse_labels(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|label| !label.is_empty())
    .map(str::to_string)
    .collect()
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放检测错误: {0}")]
  ReplayError(#[from] ReplayError),
  #[cfg(feature = "model_tract")]
  #[error("YOLOv8 模型错误: {0}")]
  Yolov8Error(#[from] Yolov8Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum DetectorWrapper {
  Replay(ReplayDetector),
  #[cfg(feature = "model_tract")]
  Yolov8(Yolov8Detector),
}

impl FromUrl for DetectorWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayDetector::SCHEME => Ok(DetectorWrapper::Replay(ReplayDetector::from_url(url)?)),
      #[cfg(feature = "model_tract")]
      Yolov8Detector::SCHEME => Ok(DetectorWrapper::Yolov8(Yolov8Detector::from_url(url)?)),
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Detector for DetectorWrapper {
  type Error = ModelError;

  fn labels(&self) -> &[String] {
    match self {
      DetectorWrapper::Replay(detector) => detector.labels(),
      #[cfg(feature = "model_tract")]
      DetectorWrapper::Yolov8(detector) => detector.labels(),
    }
  }

  fn predict(
    &mut self,
    image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    match self {
      DetectorWrapper::Replay(detector) => detector.predict(image, params).map_err(ModelError::from),
      #[cfg(feature = "model_tract")]
      DetectorWrapper::Yolov8(detector) => detector.predict(image, params).map_err(ModelError::from),
    }
  }
}
