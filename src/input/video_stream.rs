// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/input/video_stream.rs - GStreamer 视频流输入
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

//! # GStreamer 视频流输入
//!
//! 支持三类视频源：
//!
//! - 摄像头：`gst://camera/dev/video0?width=1280&height=720&fps=15`
//! - 视频文件：`gst://file/path/to/site.mp4`
//! - RTSP 网络流：`gst://rtsp/?location=rtsp://192.168.1.100:8554/stream&latency=200`
//!
//! 均可追加 `rotate=90|180|270`。帧按原始分辨率转换为 RGB 输出，时间戳取拉取帧时的系统时间。
//!
//! ## 系统依赖
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use chrono::Utc;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, query_value};

const OPEN_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum VideoStreamError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("不支持的视频源: {0}")]
  UnsupportedSource(String),
  #[error("视频源参数无效 {key}: {value}")]
  InvalidParameter { key: &'static str, value: String },
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink 元素")]
  AppSinkConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("管道状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("缓冲区大小不匹配: 需要 {expected} 字节，实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

impl VideoStreamError {
  /// 单帧转换失败可以跳过，其余错误意味着视频源不可用
  pub fn is_fatal(&self) -> bool {
    !matches!(
      self,
      VideoStreamError::VideoInfoError
        | VideoStreamError::UnsupportedFormat
        | VideoStreamError::BufferSizeMismatch { .. }
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
enum PipelineItem {
  FileSource(String),
  CameraSource {
    device: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  RtspSource {
    location: String,
    latency: u32,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat,
}

impl PipelineItem {
  fn to_pipeline(&self) -> String {
    match self {
      PipelineItem::FileSource(path) => format!("filesrc location=\"{}\" ! decodebin", path),
      PipelineItem::CameraSource {
        device,
        width,
        height,
        fps,
      } => {
        let mut caps = String::from("video/x-raw");
        if let Some(width) = width {
          caps.push_str(&format!(",width={}", width));
        }
        if let Some(height) = height {
          caps.push_str(&format!(",height={}", height));
        }
        if let Some(fps) = fps {
          caps.push_str(&format!(",framerate={}/1", fps));
        }
        format!("v4l2src device={} ! {}", device, caps)
      }
      PipelineItem::RtspSource { location, latency } => {
        format!(
          "rtspsrc location=\"{}\" latency={} ! decodebin",
          location, latency
        )
      }
      PipelineItem::VideoFlip { method } => format!("videoflip method={}", method),
      PipelineItem::TargetFormat => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

/// 由 `gst://` URL 构建的视频管道描述，`open` 后得到可迭代的 [`VideoStreamInput`]
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPipelineBuilder {
  items: Vec<PipelineItem>,
  live: bool,
}

impl FromUrlWithScheme for VideoPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for VideoPipelineBuilder {
  type Error = VideoStreamError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(VideoStreamError::SchemeMismatch(url.scheme().to_string()));
    }

    let number = |key: &'static str| -> Result<Option<u32>, VideoStreamError> {
      query_value(url, key)
        .map(|value| {
          value
            .parse::<u32>()
            .map_err(|_| VideoStreamError::InvalidParameter { key, value })
        })
        .transpose()
    };

    let (source, live) = match url.host_str() {
      Some("camera") => (
        PipelineItem::CameraSource {
          device: url.path().to_string(),
          width: number("width")?,
          height: number("height")?,
          fps: number("fps")?,
        },
        true,
      ),
      Some("file") => (PipelineItem::FileSource(url.path().to_string()), false),
      Some("rtsp") => {
        let location = query_value(url, "location").ok_or(VideoStreamError::InvalidParameter {
          key: "location",
          value: String::new(),
        })?;
        (
          PipelineItem::RtspSource {
            location,
            latency: number("latency")?.unwrap_or(200),
          },
          true,
        )
      }
      other => {
        return Err(VideoStreamError::UnsupportedSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };

    let mut items = vec![source];
    if let Some(rotate) = query_value(url, "rotate") {
      let method = match rotate.as_str() {
        "0" => None,
        "90" => Some(1),
        "180" => Some(2),
        "270" => Some(3),
        _ => {
          return Err(VideoStreamError::InvalidParameter {
            key: "rotate",
            value: rotate,
          });
        }
      };
      items.extend(method.map(|method| PipelineItem::VideoFlip { method }));
    }
    items.push(PipelineItem::TargetFormat);

    Ok(Self { items, live })
  }
}

impl VideoPipelineBuilder {
  /// 完整的管道描述，实时源丢弃积压帧，文件源逐帧读取
  pub fn describe(&self) -> String {
    let basic = self
      .items
      .iter()
      .map(PipelineItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let sink = if self.live {
      "appsink max-buffers=2 drop=true name=sink"
    } else {
      "appsink max-buffers=2 drop=false sync=false name=sink"
    };
    format!("{} ! {}", basic, sink)
  }

  pub fn is_live(&self) -> bool {
    self.live
  }

  pub fn open(self) -> Result<VideoStreamInput, VideoStreamError> {
    gst::init()?;

    let description = self.describe();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| VideoStreamError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(VideoStreamError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| VideoStreamError::AppSinkConversionFailed)?;

    let input = VideoStreamInput {
      pipeline,
      appsink,
      index: 0,
    };

    // 等待管道启动，打不开的视频源在这里报错
    input.pipeline.set_state(gst::State::Playing)?;
    let (result, _, _) = input
      .pipeline
      .state(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
    result?;

    Ok(input)
  }
}

/// 从 GStreamer 管道拉取 RGB 帧；释放时停止管道并归还视频源
pub struct VideoStreamInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  index: u64,
}

impl FromUrlWithScheme for VideoStreamInput {
  const SCHEME: &'static str = VideoPipelineBuilder::SCHEME;
}

impl FromUrl for VideoStreamInput {
  type Error = VideoStreamError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    VideoPipelineBuilder::from_url(url)?.open()
  }
}

impl Drop for VideoStreamInput {
  fn drop(&mut self) {
    match self.pipeline.set_state(gst::State::Null) {
      Ok(_) => info!("视频源已释放"),
      Err(e) => warn!("停止 GStreamer 管道失败: {}", e),
    }
  }
}

impl VideoStreamInput {
  /// 管道总线上的错误信息
  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    }
  }
}

impl Iterator for VideoStreamInput {
  type Item = Result<Frame, VideoStreamError>;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => {
        info!("视频流结束");
        return None;
      }
      Err(e) => {
        let reason = self.bus_error().unwrap_or_else(|| e.to_string());
        error!("拉取视频帧失败: {}", reason);
        return Some(Err(VideoStreamError::PipelineError(reason)));
      }
    };

    let index = self.index;
    self.index += 1;
    Some(sample_to_image(&sample).map(|image| Frame::new(image, index, Utc::now())))
  }
}

fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, VideoStreamError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| VideoStreamError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| VideoStreamError::PipelineError("样本中没有 caps".to_string()))?;
  let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| VideoStreamError::VideoInfoError)?;
  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(VideoStreamError::UnsupportedFormat);
  }

  let map = buffer
    .map_readable()
    .map_err(|e| VideoStreamError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let stride = info.stride()[0] as usize;
  let offset = info.offset()[0];

  rgb_from_strided(
    &map.as_slice()[offset.min(map.as_slice().len())..],
    info.width(),
    info.height(),
    stride,
  )
}

/// 按行跨度拷贝紧凑的 RGB 像素，行尾可能有对齐填充
fn rgb_from_strided(
  data: &[u8],
  width: u32,
  height: u32,
  stride: usize,
) -> Result<RgbImage, VideoStreamError> {
  let row = width as usize * 3;
  let expected = match height as usize {
    0 => 0,
    h => stride * (h - 1) + row,
  };
  if stride < row || data.len() < expected {
    return Err(VideoStreamError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height as usize);
  for y in 0..height as usize {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }
  RgbImage::from_raw(width, height, pixels).ok_or(VideoStreamError::BufferSizeMismatch {
    expected,
    actual: data.len(),
  })
}
