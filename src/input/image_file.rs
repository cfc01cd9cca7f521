// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/input/image_file.rs - 单张图像输入
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
use image::{ImageReader, RgbImage};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{InputError, query_time},
};

/// `image:///path/to/frame.jpg[?at=RFC3339]`，只产生一帧
pub struct ImageFileInput {
  path: PathBuf,
  image: Option<RgbImage>,
  timestamp: Option<DateTime<Utc>>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let timestamp = query_time(url, "at")?;
    Self::open(PathBuf::from(url.path()), timestamp)
  }
}

impl ImageFileInput {
  pub fn open(path: PathBuf, timestamp: Option<DateTime<Utc>>) -> Result<Self, InputError> {
    let image = ImageReader::open(&path)?
      .with_guessed_format()?
      .decode()
      .map_err(|source| InputError::OpenFailed {
        path: path.clone(),
        source,
      })?
      .into_rgb8();
    info!(
      "读取图像 {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Self {
      path,
      image: Some(image),
      timestamp,
    })
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let image = self.image.take()?;
    let timestamp = self.timestamp.unwrap_or_else(Utc::now);
    Some(Ok(Frame::new(image, 0, timestamp)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.png");
    RgbImage::new(16, 9).save(&path).unwrap();

    let url = Url::parse(&format!(
      "image://{}?at=2026-03-18T14:25:01Z",
      path.display()
    ))
    .unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    let frame = input.next().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (16, 9));
    assert_eq!(frame.timestamp.to_rfc3339(), "2026-03-18T14:25:01+00:00");
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_file_is_fatal() {
    let err = ImageFileInput::open(PathBuf::from("/nonexistent/frame.jpg"), None)
      .err()
      .unwrap();
    assert!(err.is_fatal());
  }
}
