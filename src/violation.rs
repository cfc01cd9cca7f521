// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/violation.rs - 违规记录与违规类别目录
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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 未登记法规条款时使用的占位符
pub const UNMAPPED_REGULATION: &str = "N/A";

/// 原始帧像素坐标下的边界框，保证 x1 < x2 且 y1 < y2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BBox {
  /// 退化框（宽或高不为正）返回 None
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
    (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
  }

  pub fn width(&self) -> u32 {
    (self.x2 - self.x1) as u32
  }

  pub fn height(&self) -> u32 {
    (self.y2 - self.y1) as u32
  }
}

/// 违规严重程度，目前渲染不区分，供下游排序与扩展使用
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  #[default]
  High,
  Critical,
}

/// 坐标校正后的单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub class_id: u32,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 已确认属于违规类别的检测，构造后不可修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
  timestamp: DateTime<Utc>,
  class_id: u32,
  class_name: String,
  confidence: f32,
  bbox: BBox,
  description: String,
  osha_regulation: String,
  severity: Severity,
}

impl Violation {
  pub fn new(
    detection: DetectionRecord,
    description: impl Into<String>,
    osha_regulation: impl Into<String>,
    severity: Severity,
    timestamp: DateTime<Utc>,
  ) -> Self {
    Self {
      timestamp,
      class_id: detection.class_id,
      class_name: detection.class_name,
      confidence: detection.confidence,
      bbox: detection.bbox,
      description: description.into(),
      osha_regulation: osha_regulation.into(),
      severity,
    }
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  pub fn class_id(&self) -> u32 {
    self.class_id
  }

  pub fn class_name(&self) -> &str {
    &self.class_name
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn bbox(&self) -> BBox {
    self.bbox
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn osha_regulation(&self) -> &str {
    &self.osha_regulation
  }

  pub fn severity(&self) -> Severity {
    self.severity
  }

  /// 报告编号，按捕获时间生成，例如 `20260318-142501`
  pub fn report_id(&self) -> String {
    self.timestamp.format("%Y%m%d-%H%M%S").to_string()
  }
}

/// 违规类别目录：类别名 -> 描述、法规条款、严重程度
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationCatalog {
  classes: BTreeMap<String, String>,
  #[serde(default)]
  regulations: BTreeMap<String, String>,
  #[serde(default)]
  severities: BTreeMap<String, Severity>,
}

impl ViolationCatalog {
  pub fn new(classes: BTreeMap<String, String>, regulations: BTreeMap<String, String>) -> Self {
    Self {
      classes,
      regulations,
      severities: BTreeMap::new(),
    }
  }

  pub fn with_severity(mut self, class_name: impl Into<String>, severity: Severity) -> Self {
    self.severities.insert(class_name.into(), severity);
    self
  }

  /// 工地个人防护装备的默认目录
  pub fn ppe_default() -> Self {
    let classes = [
      ("no_helmet", "Worker without hard hat/helmet"),
      ("no_goggle", "Worker without safety goggles"),
      ("no_gloves", "Worker without safety gloves"),
      ("no_boots", "Worker without safety boots"),
    ];
    let regulations = [
      ("no_helmet", "29 CFR 1926.100(a) - Head Protection"),
      ("no_goggle", "29 CFR 1926.102 - Eye and Face Protection"),
      ("no_gloves", "29 CFR 1926.95 - Hand Protection"),
      ("no_boots", "29 CFR 1926.96 - Foot Protection"),
    ];
    Self::new(
      classes
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
      regulations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    )
  }

  pub fn description(&self, class_name: &str) -> Option<&str> {
    self.classes.get(class_name).map(String::as_str)
  }

  pub fn regulation(&self, class_name: &str) -> &str {
    self
      .regulations
      .get(class_name)
      .map(String::as_str)
      .unwrap_or(UNMAPPED_REGULATION)
  }

  pub fn severity(&self, class_name: &str) -> Severity {
    self.severities.get(class_name).copied().unwrap_or_default()
  }

  pub fn class_names(&self) -> impl Iterator<Item = &str> {
    self.classes.keys().map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  pub(crate) fn merge_regulations(&mut self, regulations: BTreeMap<String, String>) {
    self.regulations.extend(regulations);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bbox_rejects_degenerate() {
    assert!(BBox::new(10, 10, 10, 20).is_none());
    assert!(BBox::new(10, 20, 30, 5).is_none());
    let bbox = BBox::new(1, 2, 11, 32).unwrap();
    assert_eq!((bbox.width(), bbox.height()), (10, 30));
  }

  #[test]
  fn catalog_falls_back_for_unmapped_regulation() {
    let catalog = ViolationCatalog::new(
      BTreeMap::from([("no_vest".to_string(), "Worker without vest".to_string())]),
      BTreeMap::new(),
    );
    assert_eq!(catalog.description("no_vest"), Some("Worker without vest"));
    assert_eq!(catalog.regulation("no_vest"), UNMAPPED_REGULATION);
    assert_eq!(catalog.severity("no_vest"), Severity::High);
  }

  #[test]
  fn default_catalog_covers_ppe_classes() {
    let catalog = ViolationCatalog::ppe_default().with_severity("no_boots", Severity::Medium);
    assert_eq!(catalog.class_names().count(), 4);
    assert_eq!(
      catalog.regulation("no_helmet"),
      "29 CFR 1926.100(a) - Head Protection"
    );
    assert_eq!(catalog.severity("no_boots"), Severity::Medium);
    assert!(catalog.description("helmet").is_none());
  }
}
