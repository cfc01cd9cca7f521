// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/cooldown.rs - 违规上报冷却门
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

//! 按类别名限流的上报决策。
//!
//! 每个类别处于 OPEN（可上报）或 CLOSED（冷却中）状态。OPEN 状态下的
//! 判定立即记录时间并转为 CLOSED，后续保存图片、生成报告是否成功都
//! 不会让门重新打开。
//!
//! 时间比较使用违规自身的时间戳。每个类别只保留已上报的最大时间戳，
//! 早于该时间戳的违规视为处于冷却窗口内，不会把记录往回拨。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::violation::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
  Open,
  Closed,
}

#[derive(Debug, Clone)]
pub struct CooldownGate {
  window: TimeDelta,
  last_reported: BTreeMap<String, DateTime<Utc>>,
}

impl CooldownGate {
  pub fn new(cooldown: Duration) -> Self {
    Self {
      window: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
      last_reported: BTreeMap::new(),
    }
  }

  pub fn cooldown(&self) -> Duration {
    self.window.to_std().unwrap_or(Duration::MAX)
  }

  /// 判定是否上报；返回 true 时已记录该违规的时间戳
  pub fn should_report(&mut self, violation: &Violation) -> bool {
    let at = violation.timestamp();
    match self.last_reported.get_mut(violation.class_name()) {
      None => {
        self
          .last_reported
          .insert(violation.class_name().to_string(), at);
        true
      }
      Some(last) if self.window.is_zero() => {
        *last = (*last).max(at);
        true
      }
      Some(last) => {
        if at.signed_duration_since(*last) < self.window {
          debug!(
            "{} 处于冷却期，上次上报于 {}",
            violation.class_name(),
            last
          );
          false
        } else {
          *last = at;
          true
        }
      }
    }
  }

  /// 在给定时刻某类别的状态，不修改任何记录
  pub fn state_at(&self, class_name: &str, at: DateTime<Utc>) -> GateState {
    match self.last_reported.get(class_name) {
      Some(last) if !self.window.is_zero() && at.signed_duration_since(*last) < self.window => {
        GateState::Closed
      }
      _ => GateState::Open,
    }
  }

  pub fn last_reported(&self, class_name: &str) -> Option<DateTime<Utc>> {
    self.last_reported.get(class_name).copied()
  }

  pub fn snapshot(&self) -> CooldownSnapshot {
    CooldownSnapshot {
      last_reported: self.last_reported.clone(),
    }
  }

  /// 合并持久化的记录，同一类别取较晚的时间
  pub fn restore(&mut self, snapshot: CooldownSnapshot) {
    for (class_name, at) in snapshot.last_reported {
      self
        .last_reported
        .entry(class_name)
        .and_modify(|last| *last = (*last).max(at))
        .or_insert(at);
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CooldownSnapshot {
  pub last_reported: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum CooldownStoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("冷却状态文件无效: {0}")]
  InvalidState(#[from] serde_json::Error),
}

/// 冷却状态的 JSON 文件存储，写入先落临时文件再改名
#[derive(Debug, Clone)]
pub struct CooldownStore {
  path: PathBuf,
}

impl CooldownStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 文件不存在时返回 None
  pub fn load(&self) -> Result<Option<CooldownSnapshot>, CooldownStoreError> {
    let raw = match std::fs::read_to_string(&self.path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };
    let snapshot: CooldownSnapshot = serde_json::from_str(&raw)?;
    info!(
      "从 {} 恢复 {} 个类别的冷却状态",
      self.path.display(),
      snapshot.last_reported.len()
    );
    Ok(Some(snapshot))
  }

  pub fn save(&self, snapshot: &CooldownSnapshot) -> Result<(), CooldownStoreError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let tmp = self.path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    std::fs::rename(&tmp, &self.path)?;
    Ok(())
  }
}
