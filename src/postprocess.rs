// 该文件是 Shanan （山南西风） 项目的一部分。
// src/postprocess.rs - 检测后处理
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

use tracing::debug;

use crate::model::{InferenceError, RawTensor};

/// 每行前 5 列: cx, cy, w, h, objectness
pub const BOX_COLUMNS: usize = 5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.0;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessConfig {
  /// 分数不低于该值才产生候选框
  pub confidence_threshold: f32,
  /// 同类框 IoU 超过该值时被抑制
  pub nms_threshold: f32,
}

impl Default for PostprocessConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }
}

/// 像素坐标下的轴对齐矩形，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxRect {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoxRect {
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self {
      x: cx - width / 2.0,
      y: cy - height / 2.0,
      width,
      height,
    }
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }
}

/// 计算两个矩形的交并比
pub fn iou(a: &BoxRect, b: &BoxRect) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 单个检测框。置信度过滤后的候选与 NMS 后的结果使用同一类型。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_index: usize,
  pub score: f32,
  pub rect: BoxRect,
}

/// 按类别分组的检测结果，下标即类别下标，无结果的类别为空列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
  per_class: Vec<Vec<Detection>>,
}

impl Detections {
  pub fn num_classes(&self) -> usize {
    self.per_class.len()
  }

  pub fn class(&self, class_index: usize) -> &[Detection] {
    self
      .per_class
      .get(class_index)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Detection> {
    self.per_class.iter().flatten()
  }

  /// 所有类别的检测总数
  pub fn total(&self) -> usize {
    self.per_class.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.total() == 0
  }
}

/// 将原始输出行转换为按类别分组的候选框
pub fn collect_candidates(
  outputs: &[RawTensor],
  frame_width: u32,
  frame_height: u32,
  num_classes: usize,
  confidence_threshold: f32,
) -> Result<Vec<Vec<Detection>>, InferenceError> {
  let mut per_class = vec![Vec::new(); num_classes];
  let (fw, fh) = (frame_width as f32, frame_height as f32);

  for (output_index, output) in outputs.iter().enumerate() {
    if output.rows() > 0 && output.cols() < BOX_COLUMNS + num_classes {
      return Err(InferenceError::OutputShape(format!(
        "输出 {} 有 {} 列, 至少需要 {} 列 ({} 个类别)",
        output_index,
        output.cols(),
        BOX_COLUMNS + num_classes,
        num_classes
      )));
    }

    for row in output.iter_rows() {
      let rect = BoxRect::from_center(row[0] * fw, row[1] * fh, row[2] * fw, row[3] * fh);
      let scores = &row[BOX_COLUMNS..BOX_COLUMNS + num_classes];
      for (class_index, &score) in scores.iter().enumerate() {
        if score >= confidence_threshold {
          per_class[class_index].push(Detection {
            class_index,
            score,
            rect,
          });
        }
      }
    }
  }

  Ok(per_class)
}

/// 贪心非极大值抑制。
///
/// 按分数降序稳定排序（同分保持原顺序），依次保留最高者并丢弃与其 IoU 大于阈值的候选。
pub fn nms(candidates: &[Detection], nms_threshold: f32) -> Vec<Detection> {
  let mut order: Vec<&Detection> = candidates.iter().collect();
  order.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Detection> = Vec::new();
  for candidate in order {
    if kept
      .iter()
      .all(|best| iou(&best.rect, &candidate.rect) <= nms_threshold)
    {
      kept.push(*candidate);
    }
  }
  kept
}

/// 置信度过滤 + 按类别 NMS
pub fn postprocess(
  outputs: &[RawTensor],
  frame_width: u32,
  frame_height: u32,
  num_classes: usize,
  config: &PostprocessConfig,
) -> Result<Detections, InferenceError> {
  let candidates = collect_candidates(
    outputs,
    frame_width,
    frame_height,
    num_classes,
    config.confidence_threshold,
  )?;

  let per_class: Vec<Vec<Detection>> = candidates
    .iter()
    .map(|class_candidates| nms(class_candidates, config.nms_threshold))
    .collect();

  let detections = Detections { per_class };
  debug!(
    "候选框 {} 个, NMS 后保留 {} 个",
    candidates.iter().map(Vec::len).sum::<usize>(),
    detections.total()
  );
  Ok(detections)
}
