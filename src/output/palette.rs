// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/palette.rs - 类别颜色
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

use image::Rgb;

// RGB: 绿、青、黄、蓝
const DEFAULT_COLORS: [[u8; 3]; 4] = [[0, 255, 0], [0, 255, 255], [255, 255, 0], [0, 0, 255]];

/// 类别到颜色的确定性映射。
///
/// 类别数超过调色板大小时颜色循环复用，这不是错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
  fn default() -> Self {
    Self {
      colors: DEFAULT_COLORS.iter().copied().map(Rgb).collect(),
    }
  }
}

impl Palette {
  /// 空调色板返回 `None`
  pub fn new(colors: Vec<[u8; 3]>) -> Option<Self> {
    if colors.is_empty() {
      return None;
    }
    Some(Self {
      colors: colors.into_iter().map(Rgb).collect(),
    })
  }

  pub fn color_for(&self, class_index: usize) -> Rgb<u8> {
    self.colors[class_index % self.colors.len()]
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}
