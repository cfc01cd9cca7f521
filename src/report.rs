// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/report.rs - 上报事件与事件落盘
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  narrative::Narrative,
  violation::{BBox, Severity, Violation},
};

/// 摄像头所在工地的标识信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteInfo {
  pub site_name: String,
  pub site_location: String,
  pub camera_id: String,
  pub company_name: String,
}

impl Default for SiteInfo {
  fn default() -> Self {
    Self {
      site_name: "Construction Site".to_string(),
      site_location: "Unknown".to_string(),
      camera_id: "camera-0".to_string(),
      company_name: "Construction Company".to_string(),
    }
  }
}

/// 通过冷却门后交给下游的一条违规事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportableEvent {
  pub report_id: String,
  pub camera_id: String,
  pub site_name: String,
  pub site_location: String,
  pub timestamp: DateTime<Utc>,
  pub class_name: String,
  pub description: String,
  pub osha_regulation: String,
  pub severity: Severity,
  pub confidence: f32,
  pub bbox: BBox,
  pub image_path: Option<PathBuf>,
  pub narrative: String,
  pub narrative_fallback: bool,
}

impl ReportableEvent {
  pub fn new(
    violation: &Violation,
    site: &SiteInfo,
    image_path: Option<PathBuf>,
    narrative: Narrative,
  ) -> Self {
    Self {
      report_id: violation.report_id(),
      camera_id: site.camera_id.clone(),
      site_name: site.site_name.clone(),
      site_location: site.site_location.clone(),
      timestamp: violation.timestamp(),
      class_name: violation.class_name().to_string(),
      description: violation.description().to_string(),
      osha_regulation: violation.osha_regulation().to_string(),
      severity: violation.severity(),
      confidence: violation.confidence(),
      bbox: violation.bbox(),
      image_path,
      narrative: narrative.text,
      narrative_fallback: narrative.fallback,
    }
  }
}

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 上报事件的下游接收方
pub trait EventSink {
  fn dispatch(&mut self, event: &ReportableEvent) -> Result<(), SinkError>;
  fn flush(&mut self) -> Result<(), SinkError>;
}

/// 每个事件一行 JSON，追加写入
pub struct JsonLinesSink {
  path: PathBuf,
  writer: BufWriter<File>,
}

impl JsonLinesSink {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
    let path = path.into();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("事件日志: {}", path.display());
    Ok(Self {
      path,
      writer: BufWriter::new(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl EventSink for JsonLinesSink {
  fn dispatch(&mut self, event: &ReportableEvent) -> Result<(), SinkError> {
    serde_json::to_writer(&mut self.writer, event)?;
    self.writer.write_all(b"\n")?;
    // 逐条落盘
    self.writer.flush()?;
    Ok(())
  }

  fn flush(&mut self) -> Result<(), SinkError> {
    self.writer.flush()?;
    Ok(())
  }
}

/// 只保存在内存中的接收方，用于一次性检测与测试
#[derive(Debug, Default)]
pub struct MemorySink {
  pub events: Vec<ReportableEvent>,
}

impl EventSink for MemorySink {
  fn dispatch(&mut self, event: &ReportableEvent) -> Result<(), SinkError> {
    self.events.push(event.clone());
    Ok(())
  }

  fn flush(&mut self) -> Result<(), SinkError> {
    Ok(())
  }
}
