// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/output/evidence.rs - 违规证据图像保存
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::info;

use crate::{
  output::{EvidenceError, EvidenceRenderer},
  violation::Violation,
};

/// 保存图像，按需创建父目录；格式由扩展名决定
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), EvidenceError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  image.save(path)?;
  info!("保存图像: {}", path.display());
  Ok(())
}

/// 证据图像目录，文件名形如 `20260318_142501_no_helmet.jpg`
#[derive(Debug, Clone)]
pub struct EvidenceStore {
  directory: PathBuf,
}

impl EvidenceStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 同一秒内同类别重复时追加 `_1`、`_2` 后缀，不覆盖已有证据
  pub fn evidence_path(&self, violation: &Violation) -> PathBuf {
    let stem = format!(
      "{}_{}",
      violation.timestamp().format("%Y%m%d_%H%M%S"),
      violation.class_name()
    );

    let mut path = self.directory.join(format!("{stem}.jpg"));
    let mut n = 1;
    while path.exists() {
      path = self.directory.join(format!("{stem}_{n}.jpg"));
      n += 1;
    }
    path
  }

  /// 标注单个违规并保存，返回写入的路径
  pub fn save_violation_image(
    &self,
    renderer: &EvidenceRenderer,
    frame: &RgbImage,
    violation: &Violation,
  ) -> Result<PathBuf, EvidenceError> {
    let annotated = renderer.draw_violations(frame, std::slice::from_ref(violation));
    let path = self.evidence_path(violation);
    save_image(&annotated, &path)?;
    Ok(path)
  }
}
