// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tract_onnx.rs - 基于 tract 的 ONNX 推理后端
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

use tracing::{debug, info};
use tract_onnx::{model::ParseResult, pb::ModelProto, prelude::*};

use crate::model::{
  ModelLoadError, ModelSource,
  backend::{BackendLoader, ExecutionTarget, InferenceBackend, InferenceError, InputTensor, RawTensor},
};

const TRACT_BACKEND_NAME: &str = "tract-onnx";

type TractPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// 纯 Rust 的 CPU 后端。
///
/// `topology` 为 ONNX 计算图；`weights` 为图中引用的张量数据文件，
/// 单文件 ONNX 时两者指向同一文件。
pub struct TractOnnxBackend {
  plan: TractPlan,
  output_names: Vec<String>,
}

impl TractOnnxBackend {
  pub fn load(source: &ModelSource, input_size: u32) -> Result<Self, ModelLoadError> {
    check_readable(&source.topology)?;
    check_readable(&source.weights)?;

    info!("加载 ONNX 模型: {}", source.topology.display());
    let onnx = tract_onnx::onnx();
    let proto = onnx
      .proto_model_for_path(&source.topology)
      .map_err(invalid)?;
    check_weights(source, &proto)?;

    // 外部张量数据相对计算图所在目录解析
    let model_dir = source.topology.parent().and_then(Path::to_str);
    let ParseResult {
      model,
      unresolved_inputs,
      ..
    } = onnx.parse(&proto, model_dir).map_err(invalid)?;
    if !unresolved_inputs.is_empty() {
      return Err(ModelLoadError::Backend(format!(
        "计算图存在无法解析的输入: {:?}",
        unresolved_inputs
      )));
    }

    let output_names = model
      .output_outlets()
      .map_err(invalid)?
      .iter()
      .map(|outlet| {
        let name = &model.node(outlet.node).name;
        if outlet.slot == 0 {
          name.clone()
        } else {
          format!("{}:{}", name, outlet.slot)
        }
      })
      .collect::<Vec<_>>();
    debug!("模型输出层: {:?}", output_names);

    let size = input_size as usize;
    let plan = model
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(invalid)?
      .into_optimized()
      .map_err(invalid)?
      .into_runnable()
      .map_err(invalid)?;
    info!("ONNX 模型优化完成, 输入 1x3x{}x{}", size, size);

    Ok(Self { plan, output_names })
  }
}

impl InferenceBackend for TractOnnxBackend {
  fn name(&self) -> &'static str {
    TRACT_BACKEND_NAME
  }

  fn target(&self) -> ExecutionTarget {
    ExecutionTarget::Cpu
  }

  fn output_names(&self) -> &[String] {
    &self.output_names
  }

  fn forward(&self, input: &InputTensor) -> Result<Vec<RawTensor>, InferenceError> {
    let [n, c, h, w] = input.shape();
    let tensor = tract_ndarray::Array4::from_shape_vec((n, c, h, w), input.data().to_vec())
      .map_err(InferenceError::backend)?
      .into_tensor();

    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(InferenceError::backend)?;

    outputs
      .iter()
      .map(|value| {
        let view = value
          .to_array_view::<f32>()
          .map_err(InferenceError::backend)?;
        RawTensor::from_shape(view.shape(), view.iter().copied().collect())
      })
      .collect()
  }
}

/// 内置的 tract CPU 加载器
#[derive(Debug, Default, Clone, Copy)]
pub struct TractOnnxLoader;

impl BackendLoader for TractOnnxLoader {
  fn name(&self) -> &'static str {
    TRACT_BACKEND_NAME
  }

  fn target(&self) -> ExecutionTarget {
    ExecutionTarget::Cpu
  }

  fn is_available(&self) -> bool {
    true
  }

  fn load(
    &self,
    source: &ModelSource,
    input_size: u32,
  ) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
    Ok(Box::new(TractOnnxBackend::load(source, input_size)?))
  }
}

fn check_readable(path: &Path) -> Result<(), ModelLoadError> {
  let metadata = std::fs::metadata(path).map_err(|source| ModelLoadError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  debug!(
    "模型资源 {}: {:.2} MB",
    path.display(),
    metadata.len() as f64 / (1024.0 * 1024.0)
  );
  Ok(())
}

/// 计算图中张量外部数据的文件位置
fn external_data_locations(proto: &ModelProto) -> Vec<&str> {
  proto
    .graph
    .iter()
    .flat_map(|graph| graph.initializer.iter())
    .flat_map(|tensor| tensor.external_data.iter())
    .filter(|entry| entry.key == "location")
    .map(|entry| entry.value.as_str())
    .collect()
}

fn canonical(path: &Path) -> Result<PathBuf, ModelLoadError> {
  std::fs::canonicalize(path).map_err(|source| ModelLoadError::Io {
    path: path.to_path_buf(),
    source,
  })
}

/// 权重必须是计算图文件本身，或计算图引用的外部数据文件
fn check_weights(source: &ModelSource, proto: &ModelProto) -> Result<(), ModelLoadError> {
  let weights = canonical(&source.weights)?;
  if weights == canonical(&source.topology)? {
    return Ok(());
  }

  let base = source.topology.parent().unwrap_or_else(|| Path::new(""));
  let locations = external_data_locations(proto);
  let referenced = locations
    .iter()
    .filter_map(|location| std::fs::canonicalize(base.join(location)).ok())
    .any(|path| path == weights);
  if !referenced {
    return Err(ModelLoadError::Backend(format!(
      "权重文件 {} 未被计算图 {} 引用 (外部数据: {:?})",
      source.weights.display(),
      source.topology.display(),
      locations
    )));
  }

  debug!("权重文件由计算图引用: {}", source.weights.display());
  Ok(())
}

fn invalid(err: TractError) -> ModelLoadError {
  ModelLoadError::Backend(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::path::PathBuf;

  #[test]
  fn missing_topology_is_an_io_error() {
    let source = ModelSource {
      topology: PathBuf::from("/nonexistent/net.onnx"),
      weights: PathBuf::from("/nonexistent/net.onnx"),
      classes: PathBuf::from("/nonexistent/classes"),
    };
    assert!(matches!(
      TractOnnxBackend::load(&source, 64),
      Err(ModelLoadError::Io { .. })
    ));
  }

  // 只含空计算图的 ModelProto: 字段 7 (graph), 长度 0
  const EMPTY_GRAPH: &[u8] = &[0x3a, 0x00];

  fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  fn referencing(location: &str) -> ModelProto {
    use ::tract_onnx::pb::{GraphProto, StringStringEntryProto, TensorProto};
    ModelProto {
      graph: Some(GraphProto {
        initializer: vec![TensorProto {
          external_data: vec![StringStringEntryProto {
            key: "location".to_string(),
            value: location.to_string(),
          }],
          ..Default::default()
        }],
        ..Default::default()
      }),
      ..Default::default()
    }
  }

  #[test]
  fn unrelated_weights_file_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let source = ModelSource {
      topology: write(dir.path(), "net.onnx", EMPTY_GRAPH),
      weights: write(dir.path(), "garbage.weights", b"not tensor data at all"),
      classes: PathBuf::from("unused"),
    };
    match TractOnnxBackend::load(&source, 64) {
      Err(ModelLoadError::Backend(reason)) => assert!(reason.contains("garbage.weights")),
      other => panic!("expected backend error, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn weights_must_be_the_graph_or_its_external_data() {
    let dir = tempfile::tempdir().unwrap();
    let topology = write(dir.path(), "net.onnx", EMPTY_GRAPH);
    let data = write(dir.path(), "net.data", &[0u8; 16]);
    let other = write(dir.path(), "other.data", &[0u8; 16]);
    let source = |weights: &Path| ModelSource {
      topology: topology.clone(),
      weights: weights.to_path_buf(),
      classes: PathBuf::from("unused"),
    };

    let proto = referencing("net.data");
    assert!(check_weights(&source(&topology), &proto).is_ok());
    assert!(check_weights(&source(&data), &proto).is_ok());
    assert!(matches!(
      check_weights(&source(&other), &proto),
      Err(ModelLoadError::Backend(_))
    ));
    assert!(matches!(
      check_weights(&source(&dir.path().join("missing.data")), &proto),
      Err(ModelLoadError::Io { .. })
    ));
  }

  #[test]
  fn corrupt_topology_is_a_backend_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"\x08\x07garbage that is not a protobuf graph").unwrap();
    let source = ModelSource {
      topology: file.path().to_path_buf(),
      weights: file.path().to_path_buf(),
      classes: PathBuf::from("unused"),
    };
    assert!(matches!(
      TractOnnxBackend::load(&source, 64),
      Err(ModelLoadError::Backend(_))
    ));
  }
}
