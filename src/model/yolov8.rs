// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/model/yolov8.rs - 基于 tract 的 YOLOv8 ONNX 检测器
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
use image::imageops::{self, FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, PredictParams, Precision, RawDetection, nms::non_max_suppression, parse_labels},
};

const YOLOV8_DEFAULT_INPUT: u32 = 640;

type YoloPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型参数无效: {0}")]
  InvalidParameter(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型输出形状无效: {0:?}")]
  InvalidOutputShape(Vec<usize>),
  #[error("缺少类别表，请在 URL 中指定 labels=")]
  MissingLabels,
}

/// YOLOv8 导出的 ONNX 模型，输出形状为 `[1, 4 + C, N]`
pub struct Yolov8Detector {
  model: YoloPlan,
  labels: Vec<String>,
  width: u32,
  height: u32,
  half_warned: bool,
}

impl FromUrlWithScheme for Yolov8Detector {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Detector {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::SchemeMismatch(url.scheme().to_string()));
    }

    let dim = |key: &str| -> Result<u32, Yolov8Error> {
      match crate::query_value(url, key) {
        Some(value) => value
          .parse()
          .map_err(|_| Yolov8Error::InvalidParameter(format!("{} = {}", key, value))),
        None => Ok(YOLOV8_DEFAULT_INPUT),
      }
    };
    let width = dim("width")?;
    let height = dim("height")?;
    let labels = crate::query_value(url, "labels")
      .map(|value| parse_labels(&value))
      .unwrap_or_default();
    if labels.is_empty() {
      return Err(Yolov8Error::MissingLabels);
    }

    Self::load(url.path(), width, height, labels)
  }
}

impl Yolov8Detector {
  pub fn load(path: &str, width: u32, height: u32, labels: Vec<String>) -> Result<Self, Yolov8Error> {
    info!("加载模型文件: {} ({}x{})", path, width, height);
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| Yolov8Error::ModelLoadError(e.to_string()))?;
    info!("模型加载完成");

    Ok(Self {
      model,
      labels,
      width,
      height,
      half_warned: false,
    })
  }

  fn build_input(&self, image: &RgbImage) -> Tensor {
    let resized;
    let image = if image.dimensions() != (self.width, self.height) {
      resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
      &resized
    } else {
      image
    };

    tract_ndarray::Array4::from_shape_fn(
      (1, 3, self.height as usize, self.width as usize),
      |(_, c, y, x)| image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
    .into_tensor()
  }
}

/// 解码 `[1, 4 + C, N]` 输出：逐锚点取最高类别分数，中心点格式转为角点并乘以缩放比例
pub(crate) fn decode_output(
  output: &Tensor,
  params: &PredictParams,
  scale: (f32, f32),
) -> Result<Vec<RawDetection>, Yolov8Error> {
  let view = output
    .to_array_view::<f32>()
    .map_err(|e| Yolov8Error::InferenceError(e.to_string()))?;
  let shape = view.shape().to_vec();
  if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
    return Err(Yolov8Error::InvalidOutputShape(shape));
  }

  let view = view
    .into_dimensionality::<tract_ndarray::Ix3>()
    .map_err(|e| Yolov8Error::InferenceError(e.to_string()))?;
  let (features, anchors) = (shape[1], shape[2]);
  let mut candidates = Vec::new();
  for a in 0..anchors {
    let (class_id, score) = (4..features)
      .map(|f| (f - 4, view[[0, f, a]]))
      .fold((0usize, f32::NEG_INFINITY), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if !score.is_finite() || score < params.confidence_floor {
      continue;
    }

    let (cx, cy, w, h) = (
      view[[0, 0, a]],
      view[[0, 1, a]],
      view[[0, 2, a]],
      view[[0, 3, a]],
    );
    candidates.push(RawDetection {
      class_id: class_id as u32,
      confidence: score,
      bbox: [
        (cx - w / 2.0) * scale.0,
        (cy - h / 2.0) * scale.1,
        (cx + w / 2.0) * scale.0,
        (cy + h / 2.0) * scale.1,
      ],
    });
  }

  debug!("候选框数量: {}", candidates.len());
  Ok(non_max_suppression(
    candidates,
    params.iou_threshold,
    params.max_detections,
  ))
}

impl Detector for Yolov8Detector {
  type Error = Yolov8Error;

  fn labels(&self) -> &[String] {
    &self.labels
  }

  fn predict(
    &mut self,
    image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    if params.precision == Precision::Half && !self.half_warned {
      warn!("CPU 推理不支持半精度，使用全精度");
      self.half_warned = true;
    }

    // 模型输入尺寸与送入图像不同时，把结果换算回送入图像的坐标
    let scale = (
      image.width() as f32 / self.width as f32,
      image.height() as f32 / self.height as f32,
    );
    let input = self.build_input(image);
    let outputs = self
      .model
      .run(tvec!(input.into()))
      .map_err(|e| Yolov8Error::InferenceError(e.to_string()))?;
    let output = outputs
      .first()
      .ok_or_else(|| Yolov8Error::InferenceError("模型没有输出".to_string()))?;

    decode_output(output, params, scale)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> PredictParams {
    PredictParams {
      confidence_floor: 0.25,
      ..PredictParams::default()
    }
  }

  #[test]
  fn decodes_best_class_and_corner_boxes() {
    // 两个类别、三个锚点，按 [特征, 锚点] 排布
    #[rustfmt::skip]
    let data = vec![
      50.0, 10.0, 200.0, // cx
      50.0, 10.0, 100.0, // cy
      20.0, 4.0, 40.0,   // w
      10.0, 4.0, 40.0,   // h
      0.1, 0.05, 0.6,    // 类别 0
      0.8, 0.1, 0.3,     // 类别 1
    ];
    let output = tract_ndarray::Array3::from_shape_vec((1, 6, 3), data)
      .unwrap()
      .into_tensor();

    let detections = decode_output(&output, &params(), (2.0, 0.5)).unwrap();
    assert_eq!(detections.len(), 2);

    assert_eq!(detections[0].class_id, 1);
    assert_eq!(detections[0].confidence, 0.8);
    assert_eq!(detections[0].bbox, [80.0, 22.5, 120.0, 27.5]);

    assert_eq!(detections[1].class_id, 0);
    assert_eq!(detections[1].confidence, 0.6);
    assert_eq!(detections[1].bbox, [360.0, 40.0, 440.0, 60.0]);
  }

  #[test]
  fn rejects_output_without_class_scores() {
    let output = tract_ndarray::Array3::<f32>::zeros((1, 4, 3)).into_tensor();
    assert!(matches!(
      decode_output(&output, &params(), (1.0, 1.0)),
      Err(Yolov8Error::InvalidOutputShape(shape)) if shape == [1, 4, 3]
    ));
  }

  #[test]
  fn model_url_requires_labels() {
    let url = Url::parse("yolov8:///models/ppe.onnx").unwrap();
    assert!(matches!(
      Yolov8Detector::from_url(&url),
      Err(Yolov8Error::MissingLabels)
    ));
  }
}
