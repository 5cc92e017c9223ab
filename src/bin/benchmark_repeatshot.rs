// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理以测量平均耗时
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use url::Url;

use shanan_annotator::{FromUrl, Model, NodeConfig, Pipeline};
use tracing::{info, warn};

// 预热轮次不计入平均值
const WARMUP_TIMES: usize = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器配置，例如 detector:///models/yolo.onnx?classes=/models/coco.names
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入 JPEG 图片
  #[arg(long, value_name = "INPUT")]
  pub input: PathBuf,
  /// 每个线程的重复次数
  #[arg(long, default_value_t = 100)]
  pub repeat: usize,
  /// 共享同一模型的并发线程数
  #[arg(long, default_value_t = 1)]
  pub threads: usize,
}

fn run_repeated(
  index: usize,
  model: &Model,
  pipeline: &Pipeline,
  input: &[u8],
  repeat: usize,
) -> Result<Vec<Duration>> {
  let mut times = Vec::with_capacity(repeat);
  for i in 0..repeat {
    let (_, report) = pipeline.run_detailed(model, input)?;
    info!(
      "[{}]({})推理完成，耗时: {:.2?}, 检测到 {} 个对象",
      index, i, report.elapsed, report.detected
    );
    times.push(report.elapsed);
  }
  Ok(times)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  if args.repeat <= WARMUP_TIMES {
    bail!("重复次数必须大于预热次数 {}", WARMUP_TIMES);
  }
  if args.threads == 0 {
    bail!("线程数必须大于 0");
  }

  info!("模型配置: {}", args.model);
  info!("输入图片: {}", args.input.display());

  let config = NodeConfig::from_url(&args.model)?;
  let model = Arc::new(Model::load(
    &config.model,
    config.execution_target,
    config.input.size,
  )?);
  let pipeline = Arc::new(Pipeline::from_config(&config)?);
  let input: Arc<[u8]> = std::fs::read(&args.input)
    .with_context(|| format!("无法读取输入图片 {}", args.input.display()))?
    .into();

  info!("开始任务: {} 线程 x {} 次", args.threads, args.repeat);
  let handles: Vec<_> = (0..args.threads)
    .map(|index| {
      let model = Arc::clone(&model);
      let pipeline = Arc::clone(&pipeline);
      let input = Arc::clone(&input);
      let repeat = args.repeat;
      thread::spawn(move || run_repeated(index, &model, &pipeline, &input, repeat))
    })
    .collect();

  let mut measured = Vec::new();
  for handle in handles {
    let times = handle
      .join()
      .map_err(|_| anyhow::anyhow!("推理线程异常退出"))??;
    measured.extend(times.into_iter().skip(WARMUP_TIMES));
  }

  warn!(
    "平均推理时间: {:.2?} ({} 次)",
    measured.iter().sum::<Duration>() / measured.len() as u32,
    measured.len()
  );

  Ok(())
}
