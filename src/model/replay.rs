// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/model/replay.rs - 检测结果回放
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

use std::collections::VecDeque;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, PredictParams, RawDetection, nms::non_max_suppression, parse_labels},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行检测记录无效: {source}")]
  InvalidRecord {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
  #[error("缺少类别表，请在 URL 中指定 labels=")]
  MissingLabels,
}

/// 按推理调用顺序回放预先记录的检测结果。
///
/// 记录文件每行一个 JSON 数组，对应一次推理调用；空行表示该帧无检测。
/// 记录耗尽后每次调用返回空结果。
pub struct ReplayDetector {
  labels: Vec<String>,
  frames: VecDeque<(usize, String)>,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(url.scheme().to_string()));
    }

    let labels = crate::query_value(url, "labels")
      .map(|value| parse_labels(&value))
      .unwrap_or_default();
    if labels.is_empty() {
      return Err(ReplayError::MissingLabels);
    }
    let path = url.path();
    info!("加载检测记录: {}", path);
    let content = std::fs::read_to_string(path)?;

    Ok(Self::from_lines(labels, content.lines()))
  }
}

impl ReplayDetector {
  pub fn from_lines<'a>(labels: Vec<String>, lines: impl IntoIterator<Item = &'a str>) -> Self {
    let frames = lines
      .into_iter()
      .enumerate()
      .map(|(idx, line)| (idx + 1, line.to_string()))
      .collect();
    Self { labels, frames }
  }

  pub fn from_frames(labels: Vec<String>, frames: Vec<Vec<RawDetection>>) -> Self {
    let frames = frames
      .into_iter()
      .enumerate()
      .map(|(idx, dets)| {
        let line = serde_json::to_string(&dets).unwrap_or_else(|_| "[]".to_string());
        (idx + 1, line)
      })
      .collect();
    Self { labels, frames }
  }

  pub fn remaining(&self) -> usize {
    self.frames.len()
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn labels(&self) -> &[String] {
    &self.labels
  }

  fn predict(
    &mut self,
    _image: &RgbImage,
    params: &PredictParams,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    let Some((line, record)) = self.frames.pop_front() else {
      debug!("检测记录已耗尽");
      return Ok(Vec::new());
    };

    if record.trim().is_empty() {
      return Ok(Vec::new());
    }

    let detections: Vec<RawDetection> = serde_json::from_str(&record)
      .map_err(|source| ReplayError::InvalidRecord { line, source })?;
    let detections = detections
      .into_iter()
      .filter(|det| det.confidence >= params.confidence_floor)
      .collect();

    Ok(non_max_suppression(
      detections,
      params.iou_threshold,
      params.max_detections,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn replays_one_record_per_call() {
    let mut detector = ReplayDetector::from_lines(
      vec!["helmet".into(), "no_helmet".into()],
      [
        r#"[{"class_id":1,"confidence":0.9,"bbox":[1.0,1.0,5.0,5.0]}]"#,
        "",
        r#"[{"class_id":0,"confidence":0.1,"bbox":[1.0,1.0,5.0,5.0]}]"#,
      ],
    );
    let image = RgbImage::new(8, 8);
    let params = PredictParams::default();

    assert_eq!(detector.predict(&image, &params).unwrap().len(), 1);
    assert!(detector.predict(&image, &params).unwrap().is_empty());
    // 低于置信度下限
    assert!(detector.predict(&image, &params).unwrap().is_empty());
    assert_eq!(detector.remaining(), 0);
    assert!(detector.predict(&image, &params).unwrap().is_empty());
  }

  #[test]
  fn malformed_record_reports_line() {
    let mut detector = ReplayDetector::from_lines(vec![], ["[]", "{not json"]);
    let image = RgbImage::new(8, 8);
    let params = PredictParams::default();
    detector.predict(&image, &params).unwrap();
    match detector.predict(&image, &params) {
      Err(ReplayError::InvalidRecord { line, .. }) => assert_eq!(line, 2),
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[test]
  fn labels_come_from_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dets.jsonl");
    std::fs::write(&path, "[]\n").unwrap();
    let url = Url::parse(&format!(
      "replay://{}?labels=helmet,no_helmet",
      path.display()
    ))
    .unwrap();
    let detector = ReplayDetector::from_url(&url).unwrap();
    assert_eq!(detector.labels(), ["helmet", "no_helmet"]);
    assert_eq!(detector.remaining(), 1);
  }

  #[test]
  fn url_without_labels_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dets.jsonl");
    std::fs::write(&path, "[{\"class_id\":1,\"confidence\":0.9,\"bbox\":[1.0,1.0,5.0,5.0]}]\n").unwrap();

    for query in ["", "?labels=", "?labels=,,"] {
      let url = Url::parse(&format!("replay://{}{}", path.display(), query)).unwrap();
      assert!(matches!(
        ReplayDetector::from_url(&url),
        Err(ReplayError::MissingLabels)
      ));
    }
  }
}
