// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/stats.rs - 运行统计
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
use std::fmt;

use serde::Serialize;

use crate::violation::Violation;

/// 一次监控会话的累计计数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
  pub frames_read: u64,
  pub frames_processed: u64,
  /// 因跳帧设置未送检的帧
  pub frames_skipped: u64,
  /// 预处理或推理失败而跳过的帧
  pub frames_failed: u64,
  /// 输入源中无法解码的帧
  pub frames_unreadable: u64,
  pub violations_detected: u64,
  pub violations_reported: u64,
  pub detected_by_class: BTreeMap<String, u64>,
  pub reported_by_class: BTreeMap<String, u64>,
  pub boxes_dropped: u64,
  pub images_saved: u64,
  pub image_failures: u64,
  pub sink_failures: u64,
  pub narratives_generated: u64,
  pub narrative_fallbacks: u64,
  pub narrative_tokens: u64,
}

impl UsageStats {
  pub fn record_detected(&mut self, violations: &[Violation]) {
    self.violations_detected += violations.len() as u64;
    for v in violations {
      *self
        .detected_by_class
        .entry(v.class_name().to_string())
        .or_default() += 1;
    }
  }

  pub fn record_reported(&mut self, violation: &Violation) {
    self.violations_reported += 1;
    *self
      .reported_by_class
      .entry(violation.class_name().to_string())
      .or_default() += 1;
  }

  pub fn record_narrative(&mut self, tokens_used: u64, fallback: bool) {
    self.narratives_generated += 1;
    self.narrative_tokens += tokens_used;
    if fallback {
      self.narrative_fallbacks += 1;
    }
  }

  pub fn avg_tokens_per_narrative(&self) -> f64 {
    if self.narratives_generated == 0 {
      0.0
    } else {
      self.narrative_tokens as f64 / self.narratives_generated as f64
    }
  }

  /// 被冷却门压下的违规数
  pub fn violations_suppressed(&self) -> u64 {
    self
      .violations_detected
      .saturating_sub(self.violations_reported)
  }
}

impl fmt::Display for UsageStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "帧: 读取 {}，检测 {}，跳过 {}，失败 {}，无法解码 {}",
      self.frames_read,
      self.frames_processed,
      self.frames_skipped,
      self.frames_failed,
      self.frames_unreadable
    )?;
    writeln!(
      f,
      "违规: 检出 {}，上报 {}，冷却压制 {}",
      self.violations_detected,
      self.violations_reported,
      self.violations_suppressed()
    )?;
    for (class_name, count) in &self.detected_by_class {
      let reported = self.reported_by_class.get(class_name).copied().unwrap_or(0);
      writeln!(f, "  {class_name}: 检出 {count}，上报 {reported}")?;
    }
    writeln!(
      f,
      "证据图像: 保存 {}，失败 {}；事件写入失败 {}；丢弃退化框 {}",
      self.images_saved, self.image_failures, self.sink_failures, self.boxes_dropped
    )?;
    write!(
      f,
      "报告: 生成 {}（基础模式 {}），token 共 {}，平均 {:.1}",
      self.narratives_generated,
      self.narrative_fallbacks,
      self.narrative_tokens,
      self.avg_tokens_per_narrative()
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::violation::{BBox, DetectionRecord, Severity};

  fn violation(class_name: &str) -> Violation {
    Violation::new(
      DetectionRecord {
        class_id: 0,
        class_name: class_name.into(),
        confidence: 0.5,
        bbox: BBox::new(0, 0, 1, 1).unwrap(),
      },
      "d",
      "N/A",
      Severity::High,
      Utc::now(),
    )
  }

  #[test]
  fn counts_by_class_and_suppression() {
    let mut stats = UsageStats::default();
    let detected = [violation("no_helmet"), violation("no_helmet"), violation("no_boots")];
    stats.record_detected(&detected);
    stats.record_reported(&detected[0]);

    assert_eq!(stats.violations_detected, 3);
    assert_eq!(stats.detected_by_class["no_helmet"], 2);
    assert_eq!(stats.reported_by_class.get("no_boots"), None);
    assert_eq!(stats.violations_suppressed(), 2);
  }

  #[test]
  fn narrative_token_average() {
    let mut stats = UsageStats::default();
    assert_eq!(stats.avg_tokens_per_narrative(), 0.0);
    stats.record_narrative(300, false);
    stats.record_narrative(0, true);
    assert_eq!(stats.narrative_fallbacks, 1);
    assert_eq!(stats.avg_tokens_per_narrative(), 150.0);
    assert!(stats.to_string().contains("基础模式 1"));
  }
}
