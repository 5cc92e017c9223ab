// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 单次调用内的解码帧。
///
/// 像素按行优先存储（HWC），通道顺序固定为 RGB，每通道 8 位。
/// 标注阶段原地修改，编码后随调用结束释放。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
}

impl Frame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    self.image.as_raw()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn frame_keeps_rgb_hwc_layout() {
    let mut image = RgbImage::new(4, 2);
    image.put_pixel(1, 0, Rgb([10, 20, 30]));
    let frame = Frame::from(image);

    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.as_ref().len(), 4 * 2 * RGB_CHANNELS);
    assert_eq!(&frame.as_ref()[3..6], &[10, 20, 30]);
  }
}
