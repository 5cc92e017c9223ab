// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 节点配置
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

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  codec::DEFAULT_JPEG_QUALITY,
  engine::{ChannelOrder, InputSpec},
  model::{ExecutionTarget, ModelSource},
  output::palette::Palette,
  postprocess::PostprocessConfig,
};

pub const KEY_NEURAL_NETWORK: &str = "neural-network";
pub const KEY_NETWORK_WEIGHTS: &str = "network-weights";
pub const KEY_NETWORK_CLASSES: &str = "network-classes";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置解析错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("缺少配置项: {0}")]
  MissingKey(&'static str),
  #[error("配置项 {key} 无效: {reason}")]
  InvalidValue { key: &'static str, reason: String },
  #[error("字体加载错误: {path}, 错误: {reason}")]
  Font { path: PathBuf, reason: String },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl ConfigError {
  fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::InvalidValue {
      key,
      reason: reason.into(),
    }
  }
}

/// 宿主传入的原始键值配置
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
  neural_network: Option<String>,
  network_weights: Option<String>,
  network_classes: Option<String>,
  input_size: Option<u32>,
  confidence_threshold: Option<f32>,
  nms_threshold: Option<f32>,
  execution_target: Option<ExecutionTarget>,
  channel_order: Option<ChannelOrder>,
  jpeg_quality: Option<u8>,
  label_font: Option<PathBuf>,
  palette: Option<Vec<[u8; 3]>>,
}

/// 标注相关配置
#[derive(Debug, Clone, Default)]
pub struct AnnotateConfig {
  pub palette: Palette,
  pub label_font: Option<PathBuf>,
}

/// 经过校验的节点配置
#[derive(Debug, Clone)]
pub struct NodeConfig {
  pub model: ModelSource,
  pub execution_target: ExecutionTarget,
  pub input: InputSpec,
  pub postprocess: PostprocessConfig,
  pub annotate: AnnotateConfig,
  pub jpeg_quality: u8,
}

impl NodeConfig {
  /// 只设置三个必需资源路径，其余取默认值
  pub fn new(
    topology: impl Into<PathBuf>,
    weights: impl Into<PathBuf>,
    classes: impl Into<PathBuf>,
  ) -> Self {
    Self {
      model: ModelSource {
        topology: topology.into(),
        weights: weights.into(),
        classes: classes.into(),
      },
      execution_target: ExecutionTarget::default(),
      input: InputSpec::default(),
      postprocess: PostprocessConfig::default(),
      annotate: AnnotateConfig::default(),
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let value: Value = serde_json::from_str(json)?;
    Self::from_value(&value)
  }

  pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
    let raw = RawConfig::deserialize(value)?;
    Self::from_raw(raw)
  }

  fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
    let topology = require_path(raw.neural_network, KEY_NEURAL_NETWORK)?;
    let weights = require_path(raw.network_weights, KEY_NETWORK_WEIGHTS)?;
    let classes = require_path(raw.network_classes, KEY_NETWORK_CLASSES)?;

    let mut config = Self::new(topology, weights, classes);

    if let Some(size) = raw.input_size {
      if size == 0 {
        return Err(ConfigError::invalid("input-size", "必须大于 0"));
      }
      config.input.size = size;
    }
    if let Some(order) = raw.channel_order {
      config.input.channel_order = order;
    }
    if let Some(target) = raw.execution_target {
      config.execution_target = target;
    }
    if let Some(threshold) = raw.confidence_threshold {
      config.postprocess.confidence_threshold = unit_range(threshold, "confidence-threshold")?;
    }
    if let Some(threshold) = raw.nms_threshold {
      config.postprocess.nms_threshold = unit_range(threshold, "nms-threshold")?;
    }
    if let Some(quality) = raw.jpeg_quality {
      if !(1..=100).contains(&quality) {
        return Err(ConfigError::invalid("jpeg-quality", "取值范围为 1..=100"));
      }
      config.jpeg_quality = quality;
    }
    if let Some(colors) = raw.palette {
      config.annotate.palette =
        Palette::new(colors).ok_or_else(|| ConfigError::invalid("palette", "调色板不能为空"))?;
    }
    config.annotate.label_font = raw.label_font;

    debug!("节点配置: {:?}", config);
    Ok(config)
  }
}

fn require_path(value: Option<String>, key: &'static str) -> Result<PathBuf, ConfigError> {
  match value {
    Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
    Some(_) => Err(ConfigError::invalid(key, "路径为空")),
    None => Err(ConfigError::MissingKey(key)),
  }
}

fn unit_range(value: f32, key: &'static str) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::invalid(key, format!("{} 不在 [0, 1] 内", value)))
  }
}

impl FromUrlWithScheme for NodeConfig {
  const SCHEME: &'static str = "detector";
}

/// 命令行工具使用的 URL 形式:
/// `detector:///path/model.onnx?weights=...&classes=...&confidence=0.5&nms=0.4&size=512&target=cpu&font=...`
///
/// 未给出 `weights` 时视为单文件 ONNX，与拓扑使用同一路径。
impl FromUrl for NodeConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut map = Map::new();
    map.insert(KEY_NEURAL_NETWORK.to_string(), Value::from(url.path()));
    map.insert(KEY_NETWORK_WEIGHTS.to_string(), Value::from(url.path()));

    for (key, value) in url.query_pairs() {
      let key = match key.as_ref() {
        "weights" => KEY_NETWORK_WEIGHTS,
        "classes" => KEY_NETWORK_CLASSES,
        "confidence" => "confidence-threshold",
        "nms" => "nms-threshold",
        "size" => "input-size",
        "target" => "execution-target",
        "order" => "channel-order",
        "quality" => "jpeg-quality",
        "font" => "label-font",
        _ => continue,
      };
      let value = serde_json::from_str::<Value>(&value)
        .ok()
        .filter(Value::is_number)
        .unwrap_or_else(|| Value::from(value.as_ref()));
      map.insert(key.to_string(), value);
    }

    Self::from_value(&Value::Object(map))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::DEFAULT_INPUT_SIZE;
  use serde_json::json;

  #[test]
  fn minimal_configuration_uses_defaults() {
    let config = NodeConfig::from_value(&json!({
      "neural-network": "yolo.onnx",
      "network-weights": "yolo.onnx",
      "network-classes": "coco.names",
    }))
    .unwrap();

    assert_eq!(config.model.topology, PathBuf::from("yolo.onnx"));
    assert_eq!(config.model.classes, PathBuf::from("coco.names"));
    assert_eq!(config.input.size, DEFAULT_INPUT_SIZE);
    assert_eq!(config.postprocess.confidence_threshold, 0.0);
    assert_eq!(config.postprocess.nms_threshold, 0.4);
    assert_eq!(config.execution_target, ExecutionTarget::Auto);
    assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
  }

  #[test]
  fn missing_resource_path_is_reported() {
    let err = NodeConfig::from_value(&json!({
      "neural-network": "yolo.onnx",
      "network-weights": "yolo.onnx",
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::MissingKey(KEY_NETWORK_CLASSES)));
  }

  #[test]
  fn blank_path_is_invalid() {
    let err = NodeConfig::from_value(&json!({
      "neural-network": " ",
      "network-weights": "w",
      "network-classes": "c",
    }))
    .unwrap_err();
    assert!(matches!(
      err,
      ConfigError::InvalidValue {
        key: KEY_NEURAL_NETWORK,
        ..
      }
    ));
  }

  #[test]
  fn tunables_are_parsed_and_validated() {
    let config = NodeConfig::from_json_str(
      r#"{
        "neural-network": "n.onnx",
        "network-weights": "n.onnx",
        "network-classes": "c.txt",
        "input-size": 416,
        "confidence-threshold": 0.25,
        "nms-threshold": 0.5,
        "execution-target": "cpu",
        "channel-order": "bgr",
        "jpeg-quality": 80,
        "palette": [[255, 0, 0], [0, 0, 255]]
      }"#,
    )
    .unwrap();

    assert_eq!(config.input.size, 416);
    assert_eq!(config.input.channel_order, ChannelOrder::Bgr);
    assert_eq!(config.postprocess.confidence_threshold, 0.25);
    assert_eq!(config.postprocess.nms_threshold, 0.5);
    assert_eq!(config.execution_target, ExecutionTarget::Cpu);
    assert_eq!(config.jpeg_quality, 80);
    assert_eq!(config.annotate.palette.len(), 2);

    let err = NodeConfig::from_value(&json!({
      "neural-network": "n",
      "network-weights": "n",
      "network-classes": "c",
      "nms-threshold": 1.5,
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { key: "nms-threshold", .. }));
  }

  #[test]
  fn url_form_maps_onto_configuration_keys() {
    let url = Url::parse("detector:///models/yolo.onnx?classes=/models/coco.names&confidence=0.5&size=320&target=cpu")
      .unwrap();
    let config = NodeConfig::from_url(&url).unwrap();

    assert_eq!(config.model.topology, PathBuf::from("/models/yolo.onnx"));
    assert_eq!(config.model.weights, PathBuf::from("/models/yolo.onnx"));
    assert_eq!(config.model.classes, PathBuf::from("/models/coco.names"));
    assert_eq!(config.postprocess.confidence_threshold, 0.5);
    assert_eq!(config.input.size, 320);
    assert_eq!(config.execution_target, ExecutionTarget::Cpu);
  }

  #[test]
  fn url_with_other_scheme_is_rejected() {
    let url = Url::parse("image:///tmp/a.jpg").unwrap();
    assert!(matches!(
      NodeConfig::from_url(&url),
      Err(ConfigError::SchemeMismatch(_))
    ));
  }
}
