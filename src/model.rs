// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::{debug, info};

mod backend;
pub use self::backend::{
  BackendLoader, ExecutionTarget, InferenceBackend, InferenceError, InputTensor, RawTensor,
  select_loader,
};

#[cfg(feature = "tract_backend")]
mod tract_onnx;
#[cfg(feature = "tract_backend")]
pub use self::tract_onnx::{TractOnnxBackend, TractOnnxLoader};

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("无法读取类别列表 {path}: {source}")]
  ClassList {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("类别列表为空: {0}")]
  EmptyClassList(PathBuf),
  #[error("无法读取模型资源 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型无效: {0}")]
  Backend(String),
  #[error("没有可用于 {0:?} 的推理后端")]
  NoBackend(ExecutionTarget),
}

/// 模型资源路径: 网络拓扑、权重与类别列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
  pub topology: PathBuf,
  pub weights: PathBuf,
  pub classes: PathBuf,
}

/// 加载后只读的检测模型。
///
/// 多个调用线程可通过 `Arc<Model>` 并发共享，推理不修改模型本身。
pub struct Model {
  backend: Box<dyn InferenceBackend>,
  classes: Vec<String>,
  input_size: u32,
}

impl std::fmt::Debug for Model {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Model")
      .field("backend", &self.backend.name())
      .field("target", &self.backend.target())
      .field("outputs", &self.backend.output_names())
      .field("num_classes", &self.classes.len())
      .field("input_size", &self.input_size)
      .finish()
  }
}

impl Model {
  /// 使用内置后端加载模型
  pub fn load(
    source: &ModelSource,
    target: ExecutionTarget,
    input_size: u32,
  ) -> Result<Self, ModelLoadError> {
    let loaders = default_loaders();
    let loaders: Vec<&dyn BackendLoader> = loaders.iter().map(|l| l.as_ref()).collect();
    Self::load_with(source, target, input_size, &loaders)
  }

  /// 从给定的后端加载器中按执行目标挑选一个来加载模型
  pub fn load_with(
    source: &ModelSource,
    target: ExecutionTarget,
    input_size: u32,
    loaders: &[&dyn BackendLoader],
  ) -> Result<Self, ModelLoadError> {
    // 类别列表先于网络读取，缺失时尽早失败
    let classes = read_class_list(&source.classes)?;

    let loader = select_loader(loaders, target).ok_or(ModelLoadError::NoBackend(target))?;
    info!(
      "使用 {} 后端 ({:?}) 加载网络: {}",
      loader.name(),
      loader.target(),
      source.topology.display()
    );
    let backend = loader.load(source, input_size)?;

    Self::from_backend(backend, classes, input_size)
  }

  /// 用任意后端构造模型
  pub fn from_backend(
    backend: Box<dyn InferenceBackend>,
    classes: Vec<String>,
    input_size: u32,
  ) -> Result<Self, ModelLoadError> {
    if classes.is_empty() {
      return Err(ModelLoadError::EmptyClassList(PathBuf::new()));
    }

    info!(
      "模型加载完成: {} 个类别, 输出层 {:?}",
      classes.len(),
      backend.output_names()
    );

    Ok(Self {
      backend,
      classes,
      input_size,
    })
  }

  pub fn class_names(&self) -> &[String] {
    &self.classes
  }

  pub fn num_classes(&self) -> usize {
    self.classes.len()
  }

  pub fn output_names(&self) -> &[String] {
    self.backend.output_names()
  }

  /// 网络的方形输入边长
  pub fn input_size(&self) -> u32 {
    self.input_size
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  pub fn target(&self) -> ExecutionTarget {
    self.backend.target()
  }

  pub(crate) fn forward(&self, input: &InputTensor) -> Result<Vec<RawTensor>, InferenceError> {
    let expected = [1, 3, self.input_size as usize, self.input_size as usize];
    if input.shape() != expected {
      return Err(InferenceError::InputShape {
        expected: expected.to_vec(),
        actual: input.shape().to_vec(),
      });
    }
    self.backend.forward(input)
  }
}

fn default_loaders() -> Vec<Box<dyn BackendLoader>> {
  #[allow(unused_mut)]
  let mut loaders: Vec<Box<dyn BackendLoader>> = Vec::new();
  #[cfg(feature = "tract_backend")]
  loaders.push(Box::new(TractOnnxLoader));
  loaders
}

/// 读取类别列表，每行一个类别名，保持顺序
pub fn read_class_list(path: &Path) -> Result<Vec<String>, ModelLoadError> {
  let content = std::fs::read_to_string(path).map_err(|source| ModelLoadError::ClassList {
    path: path.to_path_buf(),
    source,
  })?;

  let classes: Vec<String> = content.lines().map(str::to_string).collect();
  if classes.is_empty() {
    return Err(ModelLoadError::EmptyClassList(path.to_path_buf()));
  }

  debug!("读取 {} 个类别: {}", classes.len(), path.display());
  Ok(classes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  struct FixedBackend {
    outputs: Vec<String>,
  }

  impl InferenceBackend for FixedBackend {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn target(&self) -> ExecutionTarget {
      ExecutionTarget::Cpu
    }

    fn output_names(&self) -> &[String] {
      &self.outputs
    }

    fn forward(&self, _input: &InputTensor) -> Result<Vec<RawTensor>, InferenceError> {
      Ok(vec![RawTensor::new(0, 7, Vec::new())?])
    }
  }

  struct FixedLoader;

  impl BackendLoader for FixedLoader {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn target(&self) -> ExecutionTarget {
      ExecutionTarget::Cpu
    }

    fn is_available(&self) -> bool {
      true
    }

    fn load(
      &self,
      _source: &ModelSource,
      _input_size: u32,
    ) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
      Ok(Box::new(FixedBackend {
        outputs: vec!["yolo_82".to_string(), "yolo_94".to_string()],
      }))
    }
  }

  fn class_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
  }

  fn source(classes: &Path) -> ModelSource {
    ModelSource {
      topology: PathBuf::from("net.onnx"),
      weights: PathBuf::from("net.onnx"),
      classes: classes.to_path_buf(),
    }
  }

  #[test]
  fn class_list_keeps_order_and_handles_crlf() {
    let file = class_file("person\r\nbicycle\ncar\n");
    let classes = read_class_list(file.path()).unwrap();
    assert_eq!(classes, vec!["person", "bicycle", "car"]);
  }

  #[test]
  fn missing_class_list_is_a_load_error() {
    let result = Model::load_with(
      &source(Path::new("/nonexistent/classes.names")),
      ExecutionTarget::Auto,
      512,
      &[&FixedLoader],
    );
    assert!(matches!(result, Err(ModelLoadError::ClassList { .. })));
  }

  #[test]
  fn empty_class_list_is_a_load_error() {
    let file = class_file("");
    let result = Model::load_with(&source(file.path()), ExecutionTarget::Auto, 512, &[&FixedLoader]);
    assert!(matches!(result, Err(ModelLoadError::EmptyClassList(_))));
  }

  #[test]
  fn model_exposes_classes_and_outputs() {
    let file = class_file("cat\ndog\n");
    let model =
      Model::load_with(&source(file.path()), ExecutionTarget::Auto, 416, &[&FixedLoader]).unwrap();

    assert_eq!(model.num_classes(), 2);
    assert_eq!(model.class_names(), &["cat".to_string(), "dog".to_string()]);
    assert_eq!(model.output_names(), &["yolo_82".to_string(), "yolo_94".to_string()]);
    assert_eq!(model.input_size(), 416);
    assert_eq!(model.backend_name(), "fixed");
  }

  #[test]
  fn no_loader_means_no_backend() {
    let file = class_file("cat\n");
    let result = Model::load_with(&source(file.path()), ExecutionTarget::Cpu, 512, &[]);
    assert!(matches!(
      result,
      Err(ModelLoadError::NoBackend(ExecutionTarget::Cpu))
    ));
  }

  #[test]
  fn forward_rejects_wrong_input_shape() {
    let file = class_file("cat\n");
    let model =
      Model::load_with(&source(file.path()), ExecutionTarget::Cpu, 64, &[&FixedLoader]).unwrap();
    let input = InputTensor::new(vec![0.0; 3 * 32 * 32], 32).unwrap();
    assert!(matches!(
      model.forward(&input),
      Err(InferenceError::InputShape { .. })
    ));
  }

  #[test]
  fn model_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Model>();
  }
}
