// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/annotate_oneshot.rs - 单张图片检测与标注
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

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use shanan_annotator::{FromUrl, Model, NodeConfig, Pipeline};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器配置，例如 detector:///models/yolo.onnx?classes=/models/coco.names
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入 JPEG 图片
  #[arg(long, value_name = "INPUT")]
  pub input: PathBuf,
  /// 输出 JPEG 图片
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型配置: {}", args.model);
  info!("输入图片: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let config = NodeConfig::from_url(&args.model)?;
  let model = Model::load(&config.model, config.execution_target, config.input.size)?;
  let pipeline = Pipeline::from_config(&config)?;

  let input = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入图片 {}", args.input.display()))?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let (output, report) = pipeline.run_detailed(&model, &input)?;
  info!(
    "处理完成，总耗时: {:.2?}, 推理耗时: {:.2?}, 检测到 {} 个对象",
    now.elapsed(),
    report.elapsed,
    report.detected
  );

  std::fs::write(&args.output, output)
    .with_context(|| format!("无法写入输出图片 {}", args.output.display()))?;
  info!("结果已保存到: {}", args.output.display());

  Ok(())
}
