// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/bin/oneshot.rs - 单张图像违规检测
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use ppe_sentry::{
  FromUrl,
  config::MonitorConfig,
  detect::ViolationDetector,
  input::InputWrapper,
  model::DetectorWrapper,
  output::{EvidenceRenderer, save_image},
};

/// 检测单帧图像中的 PPE 违规并输出标注图
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件路径
  #[arg(long, value_name = "FILE", env = "PPE_SENTRY_CONFIG")]
  pub config: Option<PathBuf>,
  /// 检测模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///path/frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注图输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let config = MonitorConfig::load(args.config.as_deref())?;
  let model = DetectorWrapper::from_url(&args.model)?;
  let mut input = InputWrapper::from_url(&args.input)?;
  let frame = input
    .next()
    .ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;

  info!("输入帧获取成功，开始检测...");
  let mut detector =
    ViolationDetector::new(model, config.catalog.clone(), config.detector_settings());
  let violations = detector.detect_violations(&frame)?;

  for violation in &violations {
    println!("{}", serde_json::to_string(violation)?);
  }
  if let Some(perf) = detector.get_performance_stats() {
    info!(
      "检测到 {} 个违规，耗时 {:.1}ms",
      violations.len(),
      perf.avg_time_ms
    );
  }

  let renderer = match &config.font_path {
    Some(path) => EvidenceRenderer::default().with_font_file(path)?,
    None => EvidenceRenderer::default(),
  };
  let annotated = renderer.draw_violations(&frame.image, &violations);
  save_image(&annotated, &args.output)?;

  Ok(())
}
