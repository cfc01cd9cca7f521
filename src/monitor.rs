// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/monitor.rs - 监控主循环
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

//! 逐帧处理：读取、跳帧、检测、冷却判定、保存证据、生成报告、写入事件。
//!
//! 一帧处理完才读取下一帧。单帧的检测失败、证据保存失败、事件写入失败
//! 只记日志并计数，不中断循环；冷却门一旦判定上报就不再撤回。

use std::fmt;
use std::sync::mpsc::Receiver;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::MonitorConfig,
  cooldown::{CooldownGate, CooldownStore, CooldownStoreError},
  detect::{DetectError, ViolationDetector},
  frame::Frame,
  input::InputError,
  model::Detector,
  narrative::NarrativeService,
  output::{EvidenceError, EvidenceRenderer, EvidenceStore},
  perf::PerformanceSnapshot,
  report::{EventSink, ReportableEvent, SiteInfo},
  stats::UsageStats,
  violation::Violation,
};

#[derive(Error, Debug)]
pub enum MonitorError {
  #[error("冷却状态错误: {0}")]
  CooldownStoreError(#[from] CooldownStoreError),
  #[error("证据输出错误: {0}")]
  EvidenceError(#[from] EvidenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
  /// 输入源已读完
  Exhausted,
  Interrupted,
  FrameLimit,
  SourceFailed(String),
}

impl fmt::Display for StopReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StopReason::Exhausted => write!(f, "输入结束"),
      StopReason::Interrupted => write!(f, "收到中断信号"),
      StopReason::FrameLimit => write!(f, "达到指定帧数"),
      StopReason::SourceFailed(reason) => write!(f, "输入源失败: {reason}"),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
  pub stop_reason: StopReason,
  pub usage: UsageStats,
  pub performance: Option<PerformanceSnapshot>,
}

impl fmt::Display for SessionSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "结束原因: {}", self.stop_reason)?;
    match &self.performance {
      Some(perf) => writeln!(
        f,
        "推理: {} 次，平均 {:.1}ms，{:.2} FPS",
        perf.total_detections, perf.avg_time_ms, perf.avg_fps
      )?,
      None => writeln!(f, "推理: 无数据")?,
    }
    write!(f, "{}", self.usage)
  }
}

pub struct SafetyMonitor<D> {
  detector: ViolationDetector<D>,
  gate: CooldownGate,
  renderer: EvidenceRenderer,
  evidence: Option<EvidenceStore>,
  narrative: NarrativeService,
  sink: Box<dyn EventSink>,
  cooldown_store: Option<CooldownStore>,
  site: SiteInfo,
  frame_skip: u64,
  frame_limit: Option<u64>,
  stats: UsageStats,
}

impl<D: Detector> SafetyMonitor<D> {
  /// 按配置装配各组件；配置了冷却状态文件时从中恢复
  pub fn new(
    detector: D,
    config: &MonitorConfig,
    sink: Box<dyn EventSink>,
  ) -> Result<Self, MonitorError> {
    let renderer = match &config.font_path {
      Some(path) => EvidenceRenderer::default().with_font_file(path)?,
      None => EvidenceRenderer::default(),
    };

    let mut gate = CooldownGate::new(config.cooldown);
    let cooldown_store = config.cooldown_state_path.as_ref().map(CooldownStore::new);
    if let Some(store) = &cooldown_store
      && let Some(snapshot) = store.load()?
    {
      gate.restore(snapshot);
    }

    info!(
      "监控 {} / {}，冷却 {:.1}s，每 {} 帧检测一次",
      config.site.site_name,
      config.site.camera_id,
      config.cooldown.as_secs_f64(),
      config.frame_skip
    );

    Ok(Self {
      detector: ViolationDetector::new(
        detector,
        config.catalog.clone(),
        config.detector_settings(),
      ),
      gate,
      renderer,
      evidence: config
        .save_images
        .then(|| EvidenceStore::new(&config.output_dir)),
      narrative: NarrativeService::default(),
      sink,
      cooldown_store,
      site: config.site.clone(),
      frame_skip: u64::from(config.frame_skip.max(1)),
      frame_limit: None,
      stats: UsageStats::default(),
    })
  }

  pub fn with_narrative(mut self, narrative: NarrativeService) -> Self {
    self.narrative = narrative;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn stats(&self) -> &UsageStats {
    &self.stats
  }

  pub fn gate(&self) -> &CooldownGate {
    &self.gate
  }

  pub fn detector(&self) -> &ViolationDetector<D> {
    &self.detector
  }

  /// 运行直到输入结束、达到帧数上限、输入源失败或 `stop` 收到信号。
  ///
  /// 信号在每帧处理完成后检查，正在处理的帧总会完整结束。
  pub fn run<I>(&mut self, frames: I, stop: &Receiver<()>) -> SessionSummary
  where
    I: IntoIterator<Item = Result<Frame, InputError>>,
  {
    info!("开始监控...");
    let mut stop_reason = StopReason::Exhausted;

    for item in frames {
      match item {
        Ok(frame) => self.handle_frame(&frame),
        Err(e) if e.is_fatal() => {
          error!("输入源失败: {}", e);
          stop_reason = StopReason::SourceFailed(e.to_string());
          break;
        }
        Err(e) => {
          warn!("跳过无法读取的帧: {}", e);
          self.stats.frames_unreadable += 1;
        }
      }

      if self
        .frame_limit
        .is_some_and(|limit| self.stats.frames_read >= limit)
      {
        info!("达到指定帧数 {}, 退出监控循环", self.stats.frames_read);
        stop_reason = StopReason::FrameLimit;
        break;
      }
      if stop.try_recv().is_ok() {
        warn!("中断信号接收，退出监控循环");
        stop_reason = StopReason::Interrupted;
        break;
      }
    }

    self.finish(stop_reason)
  }

  fn handle_frame(&mut self, frame: &Frame) {
    self.stats.frames_read += 1;
    if self.stats.frames_read % self.frame_skip != 0 {
      self.stats.frames_skipped += 1;
      return;
    }

    if let Err(e) = self.process_frame(frame) {
      warn!("第 {} 帧检测失败，跳过: {}", frame.index, e);
      self.stats.frames_failed += 1;
    }
  }

  /// 检测一帧并处理其中的违规，返回本帧上报的数量
  pub fn process_frame(&mut self, frame: &Frame) -> Result<usize, DetectError> {
    let violations = self.detector.detect_violations(frame)?;
    self.stats.frames_processed += 1;
    self.stats.boxes_dropped = self.detector.dropped_boxes();
    self.stats.record_detected(&violations);

    let mut reported = 0;
    for violation in &violations {
      if self.should_report_violation(violation) {
        self.dispatch(frame, violation);
        reported += 1;
      }
    }
    Ok(reported)
  }

  /// 冷却门判定；判定上报时同步持久化冷却状态
  pub fn should_report_violation(&mut self, violation: &Violation) -> bool {
    if !self.gate.should_report(violation) {
      return false;
    }

    warn!(
      "上报违规: {} 置信度 {:.2}，{}",
      violation.class_name(),
      violation.confidence(),
      violation.osha_regulation()
    );
    self.stats.record_reported(violation);
    self.save_cooldown_state();
    true
  }

  fn dispatch(&mut self, frame: &Frame, violation: &Violation) {
    let image_path = match &self.evidence {
      Some(store) => match store.save_violation_image(&self.renderer, &frame.image, violation) {
        Ok(path) => {
          self.stats.images_saved += 1;
          Some(path)
        }
        Err(e) => {
          warn!("保存 {} 的证据图像失败: {}", violation.report_id(), e);
          self.stats.image_failures += 1;
          None
        }
      },
      None => None,
    };

    let narrative = self
      .narrative
      .narrate(violation, &self.site, &mut self.stats);
    let event = ReportableEvent::new(violation, &self.site, image_path, narrative);

    if let Err(e) = self.sink.dispatch(&event) {
      warn!("写入事件 {} 失败: {}", event.report_id, e);
      self.stats.sink_failures += 1;
    }
  }

  fn save_cooldown_state(&self) {
    if let Some(store) = &self.cooldown_store
      && let Err(e) = store.save(&self.gate.snapshot())
    {
      warn!("保存冷却状态到 {} 失败: {}", store.path().display(), e);
    }
  }

  fn finish(&mut self, stop_reason: StopReason) -> SessionSummary {
    if let Err(e) = self.sink.flush() {
      warn!("刷新事件日志失败: {}", e);
    }
    self.save_cooldown_state();

    info!("监控结束: {}", stop_reason);
    SessionSummary {
      stop_reason,
      usage: self.stats.clone(),
      performance: self.detector.get_performance_stats(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::mpsc;
  use std::time::Duration;

  use chrono::{TimeDelta, TimeZone, Utc};
  use image::RgbImage;

  use super::*;
  use crate::{
    model::{RawDetection, ReplayDetector},
    report::{MemorySink, SinkError},
  };

  const NO_HELMET: &str = r#"[{"class_id":1,"confidence":0.9,"bbox":[10.0,10.0,40.0,40.0]}]"#;

  fn labels() -> Vec<String> {
    vec!["helmet".into(), "no_helmet".into()]
  }

  fn config() -> MonitorConfig {
    MonitorConfig {
      cooldown: Duration::from_secs(5),
      save_images: false,
      ..Default::default()
    }
  }

  fn frames(n: usize) -> Vec<Result<Frame, InputError>> {
    let start = Utc.with_ymd_and_hms(2026, 3, 18, 8, 0, 0).unwrap();
    (0..n)
      .map(|i| {
        Ok(Frame::new(
          RgbImage::new(64, 48),
          i as u64,
          start + TimeDelta::seconds(5 * i as i64),
        ))
      })
      .collect()
  }

  struct FailingSink;

  impl EventSink for FailingSink {
    fn dispatch(&mut self, _event: &ReportableEvent) -> Result<(), SinkError> {
      Err(SinkError::IoError(std::io::Error::other("disk full")))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
      Ok(())
    }
  }

  #[test]
  fn frame_skip_processes_every_nth_frame() {
    let detector = ReplayDetector::from_lines(labels(), [NO_HELMET, NO_HELMET]);
    let config = MonitorConfig {
      frame_skip: 3,
      ..config()
    };
    let mut monitor = SafetyMonitor::new(detector, &config, Box::new(MemorySink::default())).unwrap();
    let (_tx, rx) = mpsc::channel();

    let summary = monitor.run(frames(7), &rx);
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(summary.usage.frames_read, 7);
    assert_eq!(summary.usage.frames_processed, 2);
    assert_eq!(summary.usage.frames_skipped, 5);
    assert_eq!(summary.performance.unwrap().total_detections, 2);
  }

  #[test]
  fn detection_failure_skips_frame_and_continues() {
    let detector = ReplayDetector::from_lines(labels(), ["oops", NO_HELMET]);
    let mut monitor = SafetyMonitor::new(detector, &config(), Box::new(MemorySink::default())).unwrap();
    let (_tx, rx) = mpsc::channel();

    let summary = monitor.run(frames(2), &rx);
    assert_eq!(summary.usage.frames_failed, 1);
    assert_eq!(summary.usage.violations_reported, 1);
  }

  #[test]
  fn sink_failure_never_reopens_gate() {
    let detector = ReplayDetector::from_frames(
      labels(),
      vec![
        vec![RawDetection {
          class_id: 1,
          confidence: 0.9,
          bbox: [1.0, 1.0, 20.0, 20.0],
        }];
        2
      ],
    );
    let config = MonitorConfig {
      cooldown: Duration::from_secs(60),
      ..config()
    };
    let mut monitor = SafetyMonitor::new(detector, &config, Box::new(FailingSink)).unwrap();
    let (_tx, rx) = mpsc::channel();

    let summary = monitor.run(frames(2), &rx);
    assert_eq!(summary.usage.violations_detected, 2);
    assert_eq!(summary.usage.violations_reported, 1);
    assert_eq!(summary.usage.sink_failures, 1);
    assert!(monitor.gate().last_reported("no_helmet").is_some());
  }

  #[test]
  fn fatal_input_error_stops_loop() {
    let detector = ReplayDetector::from_lines(labels(), [NO_HELMET]);
    let mut monitor = SafetyMonitor::new(detector, &config(), Box::new(MemorySink::default())).unwrap();
    let (_tx, rx) = mpsc::channel();

    let mut input = frames(1);
    input.push(Err(InputError::EmptySource("/cams".into())));
    input.extend(frames(1));

    let summary = monitor.run(input, &rx);
    assert!(matches!(summary.stop_reason, StopReason::SourceFailed(_)));
    assert_eq!(summary.usage.frames_read, 1);
  }

  #[test]
  fn frame_limit_stops_loop() {
    let detector = ReplayDetector::from_frames(labels(), vec![]);
    let mut monitor = SafetyMonitor::new(detector, &config(), Box::new(MemorySink::default()))
      .unwrap()
      .with_frame_limit(Some(2));
    let (_tx, rx) = mpsc::channel();

    let summary = monitor.run(frames(5), &rx);
    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
    assert_eq!(summary.usage.frames_read, 2);
  }

  #[test]
  fn cooldown_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = MonitorConfig {
      cooldown: Duration::from_secs(3600),
      cooldown_state_path: Some(dir.path().join("cooldown.json")),
      ..config()
    };
    let (_tx, rx) = mpsc::channel();

    let detector = ReplayDetector::from_lines(labels(), [NO_HELMET]);
    let mut first = SafetyMonitor::new(detector, &config, Box::new(MemorySink::default())).unwrap();
    assert_eq!(first.run(frames(1), &rx).usage.violations_reported, 1);

    let detector = ReplayDetector::from_lines(labels(), [NO_HELMET]);
    let mut second = SafetyMonitor::new(detector, &config, Box::new(MemorySink::default())).unwrap();
    let summary = second.run(frames(1), &rx);
    assert_eq!(summary.usage.violations_detected, 1);
    assert_eq!(summary.usage.violations_reported, 0);
  }
}
