// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/input.rs - 帧输入
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

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_value};

mod image_file;
mod image_folder;
#[cfg(feature = "gstreamer_input")]
mod video_stream;

pub use self::image_file::ImageFileInput;
pub use self::image_folder::ImageFolderInput;
#[cfg(feature = "gstreamer_input")]
pub use self::video_stream::{VideoPipelineBuilder, VideoStreamError, VideoStreamInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法打开图像 {path}: {source}")]
  OpenFailed {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("解码帧 {path} 失败: {source}")]
  DecodeFailed {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("目录中没有图像: {0}")]
  EmptySource(PathBuf),
  #[error("无效的查询参数 {key}: {value}")]
  InvalidQuery { key: &'static str, value: String },
  #[cfg(feature = "gstreamer_input")]
  #[error("视频流错误: {0}")]
  VideoStreamError(#[from] VideoStreamError),
}

impl InputError {
  /// 致命错误意味着输入源不可继续读取
  pub fn is_fatal(&self) -> bool {
    match self {
      InputError::DecodeFailed { .. } => false,
      #[cfg(feature = "gstreamer_input")]
      InputError::VideoStreamError(e) => e.is_fatal(),
      _ => true,
    }
  }
}

/// 解析 `at=` / `start=` 形式的 RFC 3339 时间参数
pub(crate) fn query_time(
  url: &url::Url,
  key: &'static str,
) -> Result<Option<DateTime<Utc>>, InputError> {
  query_value(url, key)
    .map(|value| {
      DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| InputError::InvalidQuery { key, value })
    })
    .transpose()
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  ImageFolder(ImageFolderInput),
  #[cfg(feature = "gstreamer_input")]
  VideoStream(VideoStreamInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      ImageFolderInput::SCHEME => Ok(InputWrapper::ImageFolder(ImageFolderInput::from_url(
        url,
      )?)),
      #[cfg(feature = "gstreamer_input")]
      VideoStreamInput::SCHEME => Ok(InputWrapper::VideoStream(VideoStreamInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(format!(
        "不支持的输入方式 '{other}'"
      ))),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next(),
      InputWrapper::ImageFolder(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::VideoStream(input) => input.next().map(|frame| frame.map_err(InputError::from)),
    }
  }
}
