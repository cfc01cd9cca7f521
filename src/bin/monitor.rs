// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/bin/monitor.rs - 持续监控入口
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
use std::{thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use ppe_sentry::{
  FromUrl,
  config::MonitorConfig,
  input::InputWrapper,
  model::DetectorWrapper,
  monitor::{SafetyMonitor, StopReason},
  report::JsonLinesSink,
};

/// 工地 PPE 违规持续监控
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件路径
  #[arg(long, value_name = "FILE", env = "PPE_SENTRY_CONFIG")]
  pub config: Option<PathBuf>,
  /// 检测模型，例如 replay:///path/detections.jsonl?labels=helmet,no_helmet
  /// 或 yolov8:///path/best.onnx?labels=...
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，image:///path/frame.jpg、folder:///path/frames?fps=5，
  /// 启用 gstreamer_input 时还可使用 gst://camera/dev/video0 或 gst://file/path/site.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 最大读取帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let config = MonitorConfig::load(args.config.as_deref())?;
  let detector = DetectorWrapper::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let sink = JsonLinesSink::open(&config.events_path)?;

  let mut monitor =
    SafetyMonitor::new(detector, &config, Box::new(sink))?.with_frame_limit(args.max_frames);

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，处理完当前帧后退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let summary = monitor.run(input, &rx);
  println!("{summary}");

  if let StopReason::SourceFailed(reason) = summary.stop_reason {
    anyhow::bail!("输入源失败: {reason}");
  }
  Ok(())
}
