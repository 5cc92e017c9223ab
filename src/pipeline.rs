// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 单帧推理与标注流水线
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

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  codec::{self, DecodeError, EncodeError},
  config::{ConfigError, NodeConfig},
  engine::InferenceEngine,
  model::{InferenceError, Model, ModelLoadError},
  output::{Annotator, Render},
  postprocess::{self, Detections, PostprocessConfig},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error("编码错误: {0}")]
  Encode(#[from] EncodeError),
}

/// 一次调用的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
  pub width: u32,
  pub height: u32,
  pub elapsed: Duration,
  pub detected: usize,
}

/// 解码 → 推理 → 后处理 → 标注 → 编码。
///
/// 只持有不可变配置，可在线程间共享；任一阶段失败即整个调用失败，不产生部分输出，也不重试。
#[derive(Debug, Clone)]
pub struct Pipeline {
  engine: InferenceEngine,
  postprocess: PostprocessConfig,
  annotator: Annotator,
  jpeg_quality: u8,
}

impl Pipeline {
  pub fn new(
    engine: InferenceEngine,
    postprocess: PostprocessConfig,
    annotator: Annotator,
    jpeg_quality: u8,
  ) -> Self {
    Self {
      engine,
      postprocess,
      annotator,
      jpeg_quality,
    }
  }

  pub fn from_config(config: &NodeConfig) -> Result<Self, ConfigError> {
    Ok(Self::new(
      InferenceEngine::new(config.input),
      config.postprocess,
      Annotator::new(&config.annotate)?,
      config.jpeg_quality,
    ))
  }

  pub fn postprocess_config(&self) -> &PostprocessConfig {
    &self.postprocess
  }

  pub fn run(&self, model: &Model, input: &[u8]) -> Result<Vec<u8>, PipelineError> {
    self.run_detailed(model, input).map(|(bytes, _)| bytes)
  }

  pub fn run_detailed(
    &self,
    model: &Model,
    input: &[u8],
  ) -> Result<(Vec<u8>, RunReport), PipelineError> {
    debug!("解码输入帧, {} 字节", input.len());
    let mut frame = codec::decode(input)?;
    let (width, height) = (frame.width(), frame.height());

    let inference = self.engine.infer(model, &frame)?;

    let detections: Detections = postprocess::postprocess(
      &inference.outputs,
      width,
      height,
      model.num_classes(),
      &self.postprocess,
    )?;

    self.annotator.render_result(
      &mut frame,
      &detections,
      model.class_names(),
      inference.elapsed,
    );

    let output = codec::encode(&frame, self.jpeg_quality)?;

    let report = RunReport {
      width,
      height,
      elapsed: inference.elapsed,
      detected: detections.total(),
    };
    info!(
      "帧 {}x{}: 推理耗时 {:.2?}, 检测到 {} 个对象",
      width, height, report.elapsed, report.detected
    );
    Ok((output, report))
  }
}
