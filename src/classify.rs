// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/classify.rs - 违规分类
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

use chrono::{DateTime, Utc};

use crate::violation::{DetectionRecord, Violation, ViolationCatalog};

/// 保留类别在目录中的检测并转换为违规记录，输出顺序与输入一致
pub fn classify(
  detections: &[DetectionRecord],
  catalog: &ViolationCatalog,
  capture_time: DateTime<Utc>,
) -> Vec<Violation> {
  detections
    .iter()
    .filter_map(|det| {
      let description = catalog.description(&det.class_name)?;
      Some(Violation::new(
        det.clone(),
        description,
        catalog.regulation(&det.class_name),
        catalog.severity(&det.class_name),
        capture_time,
      ))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use crate::violation::{BBox, UNMAPPED_REGULATION};

  fn record(class_name: &str, confidence: f32) -> DetectionRecord {
    DetectionRecord {
      class_id: 0,
      class_name: class_name.to_string(),
      confidence,
      bbox: BBox::new(0, 0, 10, 10).unwrap(),
    }
  }

  #[test]
  fn drops_non_violation_classes() {
    let catalog = ViolationCatalog::new(
      BTreeMap::from([("no_helmet".to_string(), "No hard hat".to_string())]),
      BTreeMap::new(),
    );
    let now = Utc::now();
    let violations = classify(
      &[record("helmet", 0.8), record("no_helmet", 0.9)],
      &catalog,
      now,
    );

    assert_eq!(violations.len(), 1);
    let v = &violations[0];
    assert_eq!(v.class_name(), "no_helmet");
    assert_eq!(v.description(), "No hard hat");
    assert_eq!(v.osha_regulation(), UNMAPPED_REGULATION);
    assert_eq!(v.timestamp(), now);
    assert_eq!(v.confidence(), 0.9);
  }

  #[test]
  fn preserves_input_order() {
    let catalog = ViolationCatalog::ppe_default();
    let violations = classify(
      &[
        record("no_boots", 0.5),
        record("person", 0.9),
        record("no_helmet", 0.7),
        record("no_boots", 0.6),
      ],
      &catalog,
      Utc::now(),
    );
    let names: Vec<_> = violations.iter().map(|v| v.class_name()).collect();
    assert_eq!(names, ["no_boots", "no_helmet", "no_boots"]);
    assert_eq!(
      violations[1].osha_regulation(),
      "29 CFR 1926.100(a) - Head Protection"
    );
  }
}
