// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, info};

use crate::{
  config::{AnnotateConfig, ConfigError},
  frame::Frame,
  output::palette::Palette,
  postprocess::{BoxRect, Detections},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: u32 = 14;
const LABEL_PADDING: u32 = 10;
const BOX_THICKNESS: u32 = 3;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const SUMMARY_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const SUMMARY_TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 255]);

// 内置的默认字体数据
const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// 检测框、标签与统计信息的绘制器
#[derive(Clone)]
pub struct Annotator {
  palette: Palette,
  font: FontArc,
  font_scale: PxScale,
}

impl std::fmt::Debug for Annotator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Annotator")
      .field("palette", &self.palette)
      .field("font_scale", &self.font_scale.y)
      .finish()
  }
}

impl Annotator {
  /// 按配置创建。配置了 `label-font` 时使用该字体，否则使用内置字体。
  pub fn new(config: &AnnotateConfig) -> Result<Self, ConfigError> {
    let font = match &config.label_font {
      Some(path) => load_font(path)?,
      None => bundled_font()?,
    };
    Ok(Self::with_font(config.palette.clone(), font))
  }

  pub fn with_font(palette: Palette, font: FontArc) -> Self {
    Self {
      palette,
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn palette(&self) -> &Palette {
    &self.palette
  }

  /// 绘制所有检测框及其标签，最后在左上角绘制统计信息。返回绘制的检测数。
  pub fn annotate(
    &self,
    frame: &mut Frame,
    detections: &Detections,
    class_names: &[String],
    elapsed: Duration,
  ) -> usize {
    let image = frame.as_image_mut();
    let mut detected = 0;

    for detection in detections.iter() {
      let color = self.palette.color_for(detection.class_index);
      let name = class_names
        .get(detection.class_index)
        .map(String::as_str)
        .unwrap_or("unknown");
      debug!(
        "  - {}: {:.2} at ({:.0}, {:.0}, {:.0}x{:.0})",
        name,
        detection.score,
        detection.rect.x,
        detection.rect.y,
        detection.rect.width,
        detection.rect.height
      );

      let (x, y) = self.draw_box(image, &detection.rect, color);
      self.draw_label(image, x, y, &format_label(name, detection.score), color);
      detected += 1;
    }

    self.draw_summary(image, &format_summary(elapsed, detected));
    detected
  }

  /// 返回框左上角的整数坐标
  fn draw_box(&self, image: &mut RgbImage, rect: &BoxRect, color: Rgb<u8>) -> (i32, i32) {
    let (w, h) = (image.width() as f32, image.height() as f32);

    // 只限制到画布附近，真正的裁剪交给绘制原语
    let x_min = rect.x.round().clamp(-1.0, w) as i32;
    let y_min = rect.y.round().clamp(-1.0, h) as i32;
    let x_max = rect.right().round().clamp(-1.0, w) as i32;
    let y_max = rect.bottom().round().clamp(-1.0, h) as i32;

    let width = (x_max - x_min).max(1) as u32;
    let height = (y_max - y_min).max(1) as u32;

    for t in 0..BOX_THICKNESS {
      if width <= 2 * t || height <= 2 * t {
        break;
      }
      let inner = Rect::at(x_min + t as i32, y_min + t as i32).of_size(width - 2 * t, height - 2 * t);
      draw_hollow_rect_mut(image, inner, color);
    }

    (x_min, y_min)
  }

  /// 标签背景的左上角纵坐标与尺寸
  fn label_layout(&self, y: i32, label: &str) -> (i32, u32, u32) {
    let (text_width, text_height) = self.measure(label);
    let background_height = text_height + LABEL_PADDING;
    // 标签位于框上方，不越过帧的上边缘
    let top = (y - background_height as i32).max(0);
    (top, text_width.max(1), background_height)
  }

  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, label: &str, color: Rgb<u8>) {
    let (top, width, height) = self.label_layout(y, label);
    draw_filled_rect_mut(image, Rect::at(x, top).of_size(width, height), color);
    self.draw_text(image, LABEL_TEXT_COLOR, x, top + (LABEL_PADDING / 2) as i32, label);
  }

  fn draw_summary(&self, image: &mut RgbImage, summary: &str) {
    let (text_width, text_height) = self.measure(summary);
    let background = Rect::at(0, 0).of_size(text_width.max(1), text_height + LABEL_PADDING);
    draw_filled_rect_mut(image, background, SUMMARY_BACKGROUND);
    self.draw_text(image, SUMMARY_TEXT_COLOR, 0, (LABEL_PADDING / 2) as i32, summary);
  }

  fn measure(&self, text: &str) -> (u32, u32) {
    let (width, height) = text_size(self.font_scale, &self.font, text);
    (width, height.max(LABEL_TEXT_HEIGHT))
  }

  fn draw_text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
    draw_text_mut(image, color, x, y, self.font_scale, &self.font, text);
  }
}

/// 检测标签文本
pub fn format_label(class_name: &str, score: f32) -> String {
  format!("{}: {:.2}", class_name, score)
}

/// 左上角统计信息文本
pub fn format_summary(elapsed: Duration, detected: usize) -> String {
  format!(
    "DNN Inference time: {}us - Detected: {}",
    elapsed.as_micros(),
    detected
  )
}

/// 随程序分发的 DejaVu Sans
pub fn bundled_font() -> Result<FontArc, ConfigError> {
  FontArc::try_from_slice(BUNDLED_FONT).map_err(|e| ConfigError::Font {
    path: PathBuf::from("<bundled>/DejaVuSans.ttf"),
    reason: e.to_string(),
  })
}

fn load_font(path: &Path) -> Result<FontArc, ConfigError> {
  let data = std::fs::read(path).map_err(|e| ConfigError::Font {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })?;
  let font = FontArc::try_from_vec(data).map_err(|e| ConfigError::Font {
    path: path.to_path_buf(),
    reason: e.to_string(),
  })?;
  info!("加载标签字体: {}", path.display());
  Ok(font)
}
