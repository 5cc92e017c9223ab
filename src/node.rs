// 该文件是 Shanan （山南西风） 项目的一部分。
// src/node.rs - 宿主数据流节点接口
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

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
  config::NodeConfig,
  model::Model,
  pipeline::{Pipeline, PipelineError},
};

/// 输入输出端口名
pub const FRAME_PORT: &str = "Frame";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
  Pending,
  Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
  pub status: TokenStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
  pub port_id: String,
  pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
  pub port_id: String,
  pub data: Vec<u8>,
}

/// 本地截止时间错过通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDeadlineMiss;

/// 初始化后交给宿主的节点句柄，可跨线程共享
#[derive(Debug, Clone)]
pub struct NodeState {
  model: Arc<Model>,
  pipeline: Arc<Pipeline>,
}

impl NodeState {
  pub fn new(model: Arc<Model>, pipeline: Arc<Pipeline>) -> Self {
    Self { model, pipeline }
  }

  pub fn model(&self) -> &Model {
    &self.model
  }

  pub fn pipeline(&self) -> &Pipeline {
    &self.pipeline
  }
}

pub fn initialize(configuration: &Value) -> Result<NodeState, PipelineError> {
  let config = NodeConfig::from_value(configuration)?;
  initialize_with(&config)
}

pub fn initialize_str(configuration: &str) -> Result<NodeState, PipelineError> {
  let config = NodeConfig::from_json_str(configuration)?;
  initialize_with(&config)
}

pub fn initialize_with(config: &NodeConfig) -> Result<NodeState, PipelineError> {
  info!("初始化检测节点");
  let model = Model::load(&config.model, config.execution_target, config.input.size)?;
  let pipeline = Pipeline::from_config(config)?;
  info!("检测节点就绪: {:?}", model);
  Ok(NodeState::new(Arc::new(model), Arc::new(pipeline)))
}

/// 所有令牌就绪时才执行；空集合视为就绪
pub fn input_rule(tokens: &[Token]) -> bool {
  tokens.iter().all(|t| t.status == TokenStatus::Ready)
}

/// 按出现顺序拼接所有 `Frame` 端口的数据
fn frame_input(inputs: Vec<Input>) -> Vec<u8> {
  let mut chunks = 0usize;
  let mut buffer = Vec::new();
  for input in inputs.into_iter().filter(|i| i.port_id == FRAME_PORT) {
    chunks += 1;
    buffer.extend_from_slice(&input.data);
  }
  if chunks > 1 {
    warn!("收到 {} 个 {} 输入, 按顺序拼接", chunks, FRAME_PORT);
  }
  buffer
}

pub fn run(state: &NodeState, inputs: Vec<Input>) -> Result<Vec<Output>, PipelineError> {
  let buffer = frame_input(inputs);
  let data = state.pipeline.run(&state.model, &buffer)?;
  Ok(vec![Output {
    port_id: FRAME_PORT.to_string(),
    data,
  }])
}

/// 原样返回 `run` 的输出
pub fn output_rule(outputs: Vec<Output>, deadline_miss: Option<LocalDeadlineMiss>) -> Vec<Output> {
  if deadline_miss.is_some() {
    debug!("本地截止时间错过, 输出原样传递");
  }
  outputs
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn token(status: TokenStatus) -> Token {
    Token { status }
  }

  #[test]
  fn input_rule_requires_every_token_ready() {
    assert!(input_rule(&[token(TokenStatus::Ready), token(TokenStatus::Ready)]));
    assert!(!input_rule(&[token(TokenStatus::Ready), token(TokenStatus::Pending)]));
  }

  #[test]
  fn input_rule_is_vacuously_true_for_no_tokens() {
    assert!(input_rule(&[]));
  }

  #[test]
  fn frame_chunks_are_concatenated_in_order() {
    let inputs = vec![
      Input {
        port_id: "Frame".to_string(),
        data: vec![1, 2],
      },
      Input {
        port_id: "Other".to_string(),
        data: vec![9],
      },
      Input {
        port_id: "Frame".to_string(),
        data: vec![3],
      },
    ];
    assert_eq!(frame_input(inputs), vec![1, 2, 3]);
  }

  #[test]
  fn output_rule_is_a_passthrough() {
    let outputs = vec![Output {
      port_id: FRAME_PORT.to_string(),
      data: vec![0xff, 0xd8],
    }];
    assert_eq!(output_rule(outputs.clone(), Some(LocalDeadlineMiss)), outputs);
    assert_eq!(output_rule(outputs.clone(), None), outputs);
  }

  #[test]
  fn missing_class_list_fails_initialization() {
    let result = initialize(&json!({
      "neural-network": "/nonexistent/yolo.onnx",
      "network-weights": "/nonexistent/yolo.onnx",
      "network-classes": "/nonexistent/coco.names",
    }));
    assert!(matches!(
      result,
      Err(PipelineError::ModelLoad(crate::ModelLoadError::ClassList { .. }))
    ));
  }

  #[test]
  fn missing_key_fails_initialization() {
    let result = initialize_str(r#"{ "neural-network": "a", "network-weights": "b" }"#);
    assert!(matches!(result, Err(PipelineError::Config(_))));
  }
}
