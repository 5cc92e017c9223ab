// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎
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

use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use serde::Deserialize;
use tracing::debug;

use crate::{
  frame::{Frame, RGB_CHANNELS},
  model::{InferenceError, InputTensor, Model, RawTensor},
};

/// 默认网络输入边长
pub const DEFAULT_INPUT_SIZE: u32 = 512;
/// 字节到单位区间的归一化系数
pub const PIXEL_SCALE: f32 = 1.0 / 255.0;

/// 输入张量的通道顺序。帧本身总是 RGB。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 张量第 `plane` 个通道取自帧像素的哪个分量
  fn source_channel(self, plane: usize) -> usize {
    match self {
      ChannelOrder::Rgb => plane,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - plane,
    }
  }
}

/// 网络输入规格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
  pub size: u32,
  pub channel_order: ChannelOrder,
}

impl Default for InputSpec {
  fn default() -> Self {
    Self {
      size: DEFAULT_INPUT_SIZE,
      channel_order: ChannelOrder::default(),
    }
  }
}

/// 一次前向推理的结果
#[derive(Debug, Clone)]
pub struct Inference {
  pub outputs: Vec<RawTensor>,
  /// 仅覆盖前向调用本身，不含张量构造
  pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceEngine {
  spec: InputSpec,
}

impl InferenceEngine {
  pub fn new(spec: InputSpec) -> Self {
    Self { spec }
  }

  pub fn spec(&self) -> &InputSpec {
    &self.spec
  }

  /// 缩放到 `size x size`（不保持宽高比），归一化并转为 NCHW
  pub fn prepare(&self, frame: &Frame) -> Result<InputTensor, InferenceError> {
    let size = self.spec.size;
    let resized = imageops::resize(frame.as_image(), size, size, FilterType::Triangle);

    let plane = (size as usize) * (size as usize);
    let mut data = vec![0f32; plane * RGB_CHANNELS];
    for (index, pixel) in resized.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        let value = pixel[self.spec.channel_order.source_channel(c)];
        data[c * plane + index] = value as f32 * PIXEL_SCALE;
      }
    }

    InputTensor::new(data, size as usize)
  }

  /// 输入边长与模型不一致时由模型返回 `InputShape` 错误
  pub fn infer(&self, model: &Model, frame: &Frame) -> Result<Inference, InferenceError> {
    let input = self.prepare(frame)?;

    debug!("执行模型推理");
    let now = Instant::now();
    let outputs = model.forward(&input)?;
    let elapsed = now.elapsed();
    debug!("推理完成，耗时: {:.2?}, {} 个输出张量", elapsed, outputs.len());

    Ok(Inference { outputs, elapsed })
  }
}
