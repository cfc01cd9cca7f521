// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/config.rs - 监控配置
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

//! 配置按三层叠加：内置默认值、JSON 配置文件、`PPE_SENTRY_*` 环境变量，最后统一校验。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{
  detect::DetectorSettings,
  model::{PredictParams, Precision},
  preprocess::ResizeSettings,
  report::SiteInfo,
  violation::{Severity, ViolationCatalog},
};

const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_OUTPUT_DIR: &str = "violations";
const DEFAULT_EVENTS_PATH: &str = "reports/events.jsonl";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件 {path} 失败: {source}")]
  ReadFailed {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("解析配置文件 {path} 失败: {source}")]
  ParseFailed {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("环境变量 {name} 无效: {value}")]
  InvalidEnv { name: &'static str, value: String },
  #[error("配置项 {0} 无效: {1}")]
  Invalid(&'static str, String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
  violation_classes: Option<BTreeMap<String, String>>,
  osha_regulations: Option<BTreeMap<String, String>>,
  severities: Option<BTreeMap<String, Severity>>,
  resize: Option<ResizeConfigFile>,
  detection: Option<DetectionConfigFile>,
  cooldown_seconds: Option<f64>,
  save_images: Option<bool>,
  output_dir: Option<PathBuf>,
  font_path: Option<PathBuf>,
  frame_skip: Option<u32>,
  site: Option<SiteInfo>,
  events_path: Option<PathBuf>,
  cooldown_state_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ResizeConfigFile {
  enabled: Option<bool>,
  width: Option<u32>,
  height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
  confidence_threshold: Option<f32>,
  iou_threshold: Option<f32>,
  max_detections: Option<usize>,
  half_precision: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
  pub catalog: ViolationCatalog,
  pub resize: ResizeSettings,
  pub detection: PredictParams,
  pub cooldown: Duration,
  pub save_images: bool,
  pub output_dir: PathBuf,
  pub font_path: Option<PathBuf>,
  /// 每 N 帧检测一帧
  pub frame_skip: u32,
  pub site: SiteInfo,
  pub events_path: PathBuf,
  /// 未设置时冷却状态随进程重启清空
  pub cooldown_state_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      catalog: ViolationCatalog::ppe_default(),
      resize: ResizeSettings::default(),
      detection: PredictParams::default(),
      cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
      save_images: true,
      output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
      font_path: None,
      frame_skip: 1,
      site: SiteInfo::default(),
      events_path: PathBuf::from(DEFAULT_EVENTS_PATH),
      cooldown_state_path: None,
    }
  }
}

fn cooldown_from_secs(name: &'static str, secs: f64) -> Result<Duration, ConfigError> {
  Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Invalid(name, secs.to_string()))
}

fn parse_bool(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

impl MonitorConfig {
  /// 读取配置文件（可选）并叠加进程环境变量
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let file = match path {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        read_config_file(path)?
      }
      None => MonitorConfigFile::default(),
    };
    let mut config = Self::from_file(file)?;
    config.apply_env_with(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
  }

  /// 从 JSON 文本构造，不读取环境变量
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let file: MonitorConfigFile =
      serde_json::from_str(json).map_err(|source| ConfigError::ParseFailed {
        path: PathBuf::from("<inline>"),
        source,
      })?;
    let config = Self::from_file(file)?;
    config.validate()?;
    Ok(config)
  }

  fn from_file(file: MonitorConfigFile) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(classes) = file.violation_classes {
      // 自定义类别仍沿用内置的法规条款
      let builtin = ViolationCatalog::ppe_default();
      let regulations = builtin
        .class_names()
        .map(|name| (name.to_string(), builtin.regulation(name).to_string()))
        .collect();
      config.catalog = ViolationCatalog::new(classes, regulations);
    }
    if let Some(regulations) = file.osha_regulations {
      config.catalog.merge_regulations(regulations);
    }
    for (class_name, severity) in file.severities.unwrap_or_default() {
      config.catalog = config.catalog.with_severity(class_name, severity);
    }

    if let Some(resize) = file.resize {
      config.resize.enabled = resize.enabled.unwrap_or(config.resize.enabled);
      config.resize.width = resize.width.unwrap_or(config.resize.width);
      config.resize.height = resize.height.unwrap_or(config.resize.height);
    }

    if let Some(detection) = file.detection {
      let params = &mut config.detection;
      params.confidence_floor = detection
        .confidence_threshold
        .unwrap_or(params.confidence_floor);
      params.iou_threshold = detection.iou_threshold.unwrap_or(params.iou_threshold);
      params.max_detections = detection.max_detections.unwrap_or(params.max_detections);
      if let Some(half) = detection.half_precision {
        params.precision = if half {
          Precision::Half
        } else {
          Precision::Full
        };
      }
    }

    if let Some(secs) = file.cooldown_seconds {
      config.cooldown = cooldown_from_secs("cooldown_seconds", secs)?;
    }
    config.save_images = file.save_images.unwrap_or(config.save_images);
    config.output_dir = file.output_dir.unwrap_or(config.output_dir);
    config.font_path = file.font_path.or(config.font_path);
    config.frame_skip = file.frame_skip.unwrap_or(config.frame_skip);
    config.site = file.site.unwrap_or(config.site);
    config.events_path = file.events_path.unwrap_or(config.events_path);
    config.cooldown_state_path = file.cooldown_state_path.or(config.cooldown_state_path);

    Ok(config)
  }

  /// 按 `lookup` 返回的环境变量覆盖配置，空值忽略
  pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    fn parsed<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
      value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
    }

    if let Some(v) = get("PPE_SENTRY_CONFIDENCE") {
      self.detection.confidence_floor = parsed("PPE_SENTRY_CONFIDENCE", v)?;
    }
    if let Some(v) = get("PPE_SENTRY_IOU") {
      self.detection.iou_threshold = parsed("PPE_SENTRY_IOU", v)?;
    }
    if let Some(v) = get("PPE_SENTRY_MAX_DETECTIONS") {
      self.detection.max_detections = parsed("PPE_SENTRY_MAX_DETECTIONS", v)?;
    }
    if let Some(v) = get("PPE_SENTRY_COOLDOWN_SECS") {
      let secs: f64 = parsed("PPE_SENTRY_COOLDOWN_SECS", v)?;
      self.cooldown = cooldown_from_secs("PPE_SENTRY_COOLDOWN_SECS", secs)?;
    }
    if let Some(v) = get("PPE_SENTRY_SAVE_IMAGES") {
      self.save_images = parse_bool(&v).ok_or(ConfigError::InvalidEnv {
        name: "PPE_SENTRY_SAVE_IMAGES",
        value: v,
      })?;
    }
    if let Some(v) = get("PPE_SENTRY_FRAME_SKIP") {
      self.frame_skip = parsed("PPE_SENTRY_FRAME_SKIP", v)?;
    }
    if let Some(v) = get("PPE_SENTRY_OUTPUT_DIR") {
      self.output_dir = PathBuf::from(v);
    }
    if let Some(v) = get("PPE_SENTRY_FONT") {
      self.font_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get("PPE_SENTRY_EVENTS_PATH") {
      self.events_path = PathBuf::from(v);
    }
    if let Some(v) = get("PPE_SENTRY_COOLDOWN_STATE") {
      self.cooldown_state_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get("PPE_SENTRY_SITE_NAME") {
      self.site.site_name = v;
    }
    if let Some(v) = get("PPE_SENTRY_SITE_LOCATION") {
      self.site.site_location = v;
    }
    if let Some(v) = get("PPE_SENTRY_CAMERA_ID") {
      self.site.camera_id = v;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let unit = 0.0..=1.0;
    if !unit.contains(&self.detection.confidence_floor) {
      return Err(ConfigError::Invalid(
        "confidence_threshold",
        self.detection.confidence_floor.to_string(),
      ));
    }
    if !unit.contains(&self.detection.iou_threshold) {
      return Err(ConfigError::Invalid(
        "iou_threshold",
        self.detection.iou_threshold.to_string(),
      ));
    }
    if self.detection.max_detections == 0 {
      return Err(ConfigError::Invalid("max_detections", "0".into()));
    }
    if self.resize.enabled && (self.resize.width == 0 || self.resize.height == 0) {
      return Err(ConfigError::Invalid(
        "resize",
        format!("{}x{}", self.resize.width, self.resize.height),
      ));
    }
    if self.frame_skip == 0 {
      return Err(ConfigError::Invalid("frame_skip", "0".into()));
    }
    if self.catalog.is_empty() {
      return Err(ConfigError::Invalid(
        "violation_classes",
        "至少需要一个违规类别".into(),
      ));
    }
    Ok(())
  }

  pub fn detector_settings(&self) -> DetectorSettings {
    DetectorSettings {
      resize: self.resize,
      params: self.detection,
    }
  }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile, ConfigError> {
  let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  #[test]
  fn defaults_match_site_deployment() {
    let config = MonitorConfig::default();
    config.validate().unwrap();
    assert_eq!(config.cooldown, Duration::from_secs(30));
    assert_eq!(config.detection.max_detections, 50);
    assert_eq!((config.resize.width, config.resize.height), (640, 480));
    assert_eq!(config.catalog.class_names().count(), 4);
    assert_eq!(config.frame_skip, 1);
    assert!(config.save_images);
    assert!(config.cooldown_state_path.is_none());
  }

  #[test]
  fn file_overrides_defaults() {
    let config = MonitorConfig::from_json(
      r#"{
        "violation_classes": {"no_helmet": "No hard hat", "no_vest": "No hi-vis vest"},
        "osha_regulations": {"no_vest": "29 CFR 1926.201"},
        "severities": {"no_vest": "medium"},
        "detection": {"confidence_threshold": 0.4, "half_precision": true},
        "resize": {"enabled": false},
        "cooldown_seconds": 2.5,
        "site": {"site_name": "North Yard", "camera_id": "cam-7"}
      }"#,
    )
    .unwrap();

    assert_eq!(config.catalog.description("no_helmet"), Some("No hard hat"));
    assert!(config.catalog.description("no_boots").is_none());
    assert_eq!(
      config.catalog.regulation("no_helmet"),
      "29 CFR 1926.100(a) - Head Protection"
    );
    assert_eq!(config.catalog.regulation("no_vest"), "29 CFR 1926.201");
    assert_eq!(config.catalog.severity("no_vest"), Severity::Medium);
    assert_eq!(config.detection.confidence_floor, 0.4);
    assert_eq!(config.detection.precision, Precision::Half);
    assert!(!config.resize.enabled);
    assert_eq!(config.cooldown, Duration::from_millis(2500));
    assert_eq!(config.site.site_name, "North Yard");
    assert_eq!(config.site.site_location, "Unknown");
  }

  #[test]
  fn env_overrides_file() {
    let env = HashMap::from([
      ("PPE_SENTRY_COOLDOWN_SECS", "0"),
      ("PPE_SENTRY_SAVE_IMAGES", "off"),
      ("PPE_SENTRY_CAMERA_ID", "gate-2"),
      ("PPE_SENTRY_OUTPUT_DIR", "  "),
    ]);
    let mut config = MonitorConfig::default();
    config
      .apply_env_with(|name| env.get(name).map(|v| v.to_string()))
      .unwrap();

    assert_eq!(config.cooldown, Duration::ZERO);
    assert!(!config.save_images);
    assert_eq!(config.site.camera_id, "gate-2");
    assert_eq!(config.output_dir, PathBuf::from("violations"));
  }

  #[test]
  fn rejects_invalid_values() {
    assert!(matches!(
      MonitorConfig::from_json(r#"{"cooldown_seconds": -1}"#),
      Err(ConfigError::Invalid("cooldown_seconds", _))
    ));
    assert!(matches!(
      MonitorConfig::from_json(r#"{"frame_skip": 0}"#),
      Err(ConfigError::Invalid("frame_skip", _))
    ));
    assert!(matches!(
      MonitorConfig::from_json(r#"{"detection": {"iou_threshold": 1.5}}"#),
      Err(ConfigError::Invalid("iou_threshold", _))
    ));
    assert!(matches!(
      MonitorConfig::from_json(r#"{"violation_classes": {}}"#),
      Err(ConfigError::Invalid("violation_classes", _))
    ));
    assert!(matches!(
      MonitorConfig::from_json(r#"{"cooldown": 5}"#),
      Err(ConfigError::ParseFailed { .. })
    ));

    let mut config = MonitorConfig::default();
    let result = config.apply_env_with(|name| {
      (name == "PPE_SENTRY_MAX_DETECTIONS").then(|| "many".to_string())
    });
    assert!(matches!(
      result,
      Err(ConfigError::InvalidEnv {
        name: "PPE_SENTRY_MAX_DETECTIONS",
        ..
      })
    ));
  }

  #[test]
  fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentry.json");
    std::fs::write(&path, r#"{"frame_skip": 5, "save_images": false}"#).unwrap();

    let config = MonitorConfig::from_file(read_config_file(&path).unwrap()).unwrap();
    assert_eq!(config.frame_skip, 5);
    assert!(!config.save_images);

    assert!(matches!(
      read_config_file(&dir.path().join("missing.json")),
      Err(ConfigError::ReadFailed { .. })
    ));
  }
}
