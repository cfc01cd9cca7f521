// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/input/image_folder.rs - 图像序列目录输入
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

use chrono::{DateTime, TimeDelta, Utc};
use image::ImageReader;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{InputError, query_time},
  query_value,
};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// `folder:///dir[?fps=N&start=RFC3339]`，按文件名顺序逐帧读取。
///
/// 指定 `fps` 时帧时间为 `start + index / fps`（录像回放），否则取读取时的系统时间。
pub struct ImageFolderInput {
  directory: PathBuf,
  files: Vec<PathBuf>,
  position: usize,
  fps: Option<f64>,
  start: DateTime<Utc>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let fps = match query_value(url, "fps") {
      Some(value) => match value.parse::<f64>() {
        Ok(fps) if fps.is_finite() && fps > 0.0 => Some(fps),
        _ => return Err(InputError::InvalidQuery { key: "fps", value }),
      },
      None => None,
    };
    let start = query_time(url, "start")?.unwrap_or_else(Utc::now);

    Self::open(Path::new(url.path()), fps, start)
  }
}

impl ImageFolderInput {
  pub fn open(directory: &Path, fps: Option<f64>, start: DateTime<Utc>) -> Result<Self, InputError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if path.is_file() && is_image {
        files.push(path);
      }
    }

    if files.is_empty() {
      return Err(InputError::EmptySource(directory.to_path_buf()));
    }
    files.sort();

    info!("目录 {} 中共有 {} 帧", directory.display(), files.len());

    Ok(Self {
      directory: directory.to_path_buf(),
      files,
      position: 0,
      fps,
      start,
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn timestamp(&self, index: usize) -> Result<DateTime<Utc>, InputError> {
    match self.fps {
      Some(fps) => {
        let micros = (index as f64 / fps * 1_000_000.0).round() as i64;
        self
          .start
          .checked_add_signed(TimeDelta::microseconds(micros))
          .ok_or_else(|| InputError::InvalidQuery {
            key: "fps",
            value: fps.to_string(),
          })
      }
      None => Ok(Utc::now()),
    }
  }
}

impl Iterator for ImageFolderInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let index = self.position;
    let path = self.files.get(index)?.clone();
    self.position += 1;

    let timestamp = match self.timestamp(index) {
      Ok(timestamp) => timestamp,
      Err(e) => return Some(Err(e)),
    };
    let decoded = ImageReader::open(&path)
      .map_err(image::ImageError::IoError)
      .and_then(|reader| reader.decode())
      .map_err(|source| InputError::DecodeFailed {
        path: path.clone(),
        source,
      });

    Some(decoded.map(|image| Frame::new(image.into_rgb8(), index as u64, timestamp)))
  }
}
