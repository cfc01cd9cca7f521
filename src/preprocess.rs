// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/preprocess.rs - 推理前的帧缩放
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

use std::borrow::Cow;

use image::RgbImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("输入帧无效: {width}x{height}")]
  InvalidFrame { width: u32, height: u32 },
  #[error("缩放目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeSettings {
  pub enabled: bool,
  pub width: u32,
  pub height: u32,
}

impl Default for ResizeSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      width: 640,
      height: 480,
    }
  }
}

/// 预处理结果：送入模型的图像，以及映射回原始帧的缩放系数
#[derive(Debug)]
pub struct Prepared<'a> {
  pub image: Cow<'a, RgbImage>,
  pub scale_x: f64,
  pub scale_y: f64,
}

/// 将帧缩放到目标尺寸（不保持宽高比），返回反向缩放系数
pub fn prepare<'a>(
  frame: &'a RgbImage,
  settings: &ResizeSettings,
) -> Result<Prepared<'a>, PreprocessError> {
  let (width, height) = frame.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::InvalidFrame { width, height });
  }

  if !settings.enabled {
    return Ok(Prepared {
      image: Cow::Borrowed(frame),
      scale_x: 1.0,
      scale_y: 1.0,
    });
  }

  if settings.width == 0 || settings.height == 0 {
    return Err(PreprocessError::InvalidTarget {
      width: settings.width,
      height: settings.height,
    });
  }

  debug!(
    "缩放帧 {}x{} -> {}x{}",
    width, height, settings.width, settings.height
  );
  let resized = imageops::resize(frame, settings.width, settings.height, FilterType::Triangle);

  Ok(Prepared {
    image: Cow::Owned(resized),
    scale_x: width as f64 / settings.width as f64,
    scale_y: height as f64 / settings.height as f64,
  })
}
