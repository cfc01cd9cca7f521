// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/perf.rs - 推理耗时统计
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

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default, Clone)]
pub struct PerformanceTracker {
  total_calls: u64,
  total_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
  pub avg_time_ms: f64,
  pub avg_fps: f64,
  pub total_detections: u64,
}

impl PerformanceTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, duration: Duration) {
    self.total_calls += 1;
    self.total_time += duration;
  }

  pub fn total_calls(&self) -> u64 {
    self.total_calls
  }

  /// 尚无调用时返回 None
  pub fn snapshot(&self) -> Option<PerformanceSnapshot> {
    if self.total_calls == 0 {
      return None;
    }

    let avg = self.total_time.as_secs_f64() / self.total_calls as f64;
    Some(PerformanceSnapshot {
      avg_time_ms: avg * 1000.0,
      avg_fps: if avg > 0.0 { 1.0 / avg } else { 0.0 },
      total_detections: self.total_calls,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn no_data_before_first_call() {
    assert!(PerformanceTracker::new().snapshot().is_none());
  }

  #[test]
  fn averages_over_calls() {
    let mut tracker = PerformanceTracker::new();
    tracker.record(Duration::from_millis(100));
    let snapshot = tracker.snapshot().unwrap();
    assert!((snapshot.avg_fps - 10.0).abs() < 1e-9);
    assert!((snapshot.avg_time_ms - 100.0).abs() < 1e-9);

    tracker.record(Duration::from_millis(300));
    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.total_detections, 2);
    assert!((snapshot.avg_time_ms - 200.0).abs() < 1e-9);
  }

  #[test]
  fn zero_duration_reports_zero_fps() {
    let mut tracker = PerformanceTracker::new();
    tracker.record(Duration::ZERO);
    assert_eq!(tracker.snapshot().unwrap().avg_fps, 0.0);
  }
}
