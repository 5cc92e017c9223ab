// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/backend.rs - 推理后端抽象
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

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{ModelLoadError, ModelSource};

/// 期望的执行目标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
  /// 有加速器时使用加速器，否则使用 CPU
  #[default]
  Auto,
  Accelerated,
  Cpu,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("输出张量形状不匹配: {0}")]
  OutputShape(String),
  #[error("后端推理错误: {0}")]
  Backend(String),
}

impl InferenceError {
  pub fn backend(err: impl std::fmt::Display) -> Self {
    InferenceError::Backend(format!("{:#}", err))
  }
}

/// NCHW 排布的单张输入张量，形状为 `[1, 3, S, S]`
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Vec<f32>,
  shape: [usize; 4],
}

impl InputTensor {
  pub fn new(data: Vec<f32>, size: usize) -> Result<Self, InferenceError> {
    let shape = [1, 3, size, size];
    if data.len() != shape.iter().product::<usize>() {
      return Err(InferenceError::InputShape {
        expected: shape.to_vec(),
        actual: vec![data.len()],
      });
    }
    Ok(Self { data, shape })
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_data(self) -> Vec<f32> {
    self.data
  }
}

/// 一个输出层的原始检测张量，按 `rows x cols` 行优先存储。
///
/// 每行: `[cx, cy, w, h, objectness, score_0, score_1, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  rows: usize,
  cols: usize,
  data: Vec<f32>,
}

impl RawTensor {
  pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, InferenceError> {
    if rows * cols != data.len() {
      return Err(InferenceError::OutputShape(format!(
        "{}x{} 需要 {} 个元素, 实际 {}",
        rows,
        cols,
        rows * cols,
        data.len()
      )));
    }
    Ok(Self { rows, cols, data })
  }

  /// 由任意维度的输出构造，最后一维作为列，其余维度展平为行
  pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self, InferenceError> {
    let (&cols, leading) = shape
      .split_last()
      .ok_or_else(|| InferenceError::OutputShape("标量输出".to_string()))?;
    let rows = leading.iter().product::<usize>();
    Self::new(rows, cols, data)
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn row(&self, index: usize) -> &[f32] {
    &self.data[index * self.cols..(index + 1) * self.cols]
  }

  pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
    // cols 为 0 时 chunks_exact 会 panic
    self.data.chunks_exact(self.cols.max(1)).take(self.rows)
  }
}

/// 已加载网络的前向执行能力。
///
/// 实现必须可在多个线程间以 `&self` 并发调用。
pub trait InferenceBackend: Send + Sync {
  fn name(&self) -> &'static str;

  fn target(&self) -> ExecutionTarget;

  /// 前向推理收集的输出层名称，顺序与 `forward` 的返回一致
  fn output_names(&self) -> &[String];

  fn forward(&self, input: &InputTensor) -> Result<Vec<RawTensor>, InferenceError>;
}

/// 网络加载能力
pub trait BackendLoader: Send + Sync {
  fn name(&self) -> &'static str;

  fn target(&self) -> ExecutionTarget;

  fn is_available(&self) -> bool;

  fn load(
    &self,
    source: &ModelSource,
    input_size: u32,
  ) -> Result<Box<dyn InferenceBackend>, ModelLoadError>;
}

/// 按执行目标挑选加载器，加速器不可用时回退到 CPU
pub fn select_loader<'a>(
  loaders: &[&'a dyn BackendLoader],
  target: ExecutionTarget,
) -> Option<&'a dyn BackendLoader> {
  let find = |wanted: ExecutionTarget| {
    loaders
      .iter()
      .copied()
      .find(|l| l.target() == wanted && l.is_available())
  };

  match target {
    ExecutionTarget::Cpu => find(ExecutionTarget::Cpu),
    ExecutionTarget::Accelerated => find(ExecutionTarget::Accelerated).or_else(|| {
      warn!("没有可用的加速后端，回退到 CPU");
      find(ExecutionTarget::Cpu)
    }),
    ExecutionTarget::Auto => find(ExecutionTarget::Accelerated).or_else(|| {
      info!("未检测到加速后端，使用 CPU");
      find(ExecutionTarget::Cpu)
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Probe {
    name: &'static str,
    target: ExecutionTarget,
    available: bool,
  }

  impl BackendLoader for Probe {
    fn name(&self) -> &'static str {
      self.name
    }

    fn target(&self) -> ExecutionTarget {
      self.target
    }

    fn is_available(&self) -> bool {
      self.available
    }

    fn load(
      &self,
      _source: &ModelSource,
      _input_size: u32,
    ) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
      Err(ModelLoadError::Backend("probe".to_string()))
    }
  }

  const CPU: Probe = Probe {
    name: "cpu",
    target: ExecutionTarget::Cpu,
    available: true,
  };
  const GPU: Probe = Probe {
    name: "gpu",
    target: ExecutionTarget::Accelerated,
    available: true,
  };
  const GPU_MISSING: Probe = Probe {
    name: "gpu",
    target: ExecutionTarget::Accelerated,
    available: false,
  };

  #[test]
  fn auto_prefers_accelerator() {
    let picked = select_loader(&[&CPU, &GPU], ExecutionTarget::Auto).unwrap();
    assert_eq!(picked.name(), "gpu");
  }

  #[test]
  fn accelerated_falls_back_to_cpu() {
    let picked = select_loader(&[&GPU_MISSING, &CPU], ExecutionTarget::Accelerated).unwrap();
    assert_eq!(picked.name(), "cpu");
  }

  #[test]
  fn cpu_never_picks_accelerator() {
    assert!(select_loader(&[&GPU], ExecutionTarget::Cpu).is_none());
  }

  #[test]
  fn raw_tensor_flattens_leading_dimensions() {
    let tensor = RawTensor::from_shape(&[1, 2, 3], vec![0., 1., 2., 3., 4., 5.]).unwrap();
    assert_eq!((tensor.rows(), tensor.cols()), (2, 3));
    assert_eq!(tensor.row(1), &[3., 4., 5.]);
    assert_eq!(tensor.iter_rows().count(), 2);
  }

  #[test]
  fn raw_tensor_rejects_inconsistent_length() {
    assert!(matches!(
      RawTensor::new(2, 3, vec![0.0; 5]),
      Err(InferenceError::OutputShape(_))
    ));
    assert!(RawTensor::from_shape(&[], vec![]).is_err());
  }

  #[test]
  fn input_tensor_checks_length() {
    assert!(InputTensor::new(vec![0.0; 3 * 4 * 4], 4).is_ok());
    assert!(InputTensor::new(vec![0.0; 10], 4).is_err());
  }
}
