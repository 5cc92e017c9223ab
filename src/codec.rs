// 该文件是 Shanan （山南西风） 项目的一部分。
// src/codec.rs - 帧编解码
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

use std::io::Cursor;

use image::{ImageFormat, ImageReader, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;

/// 默认 JPEG 编码质量
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输入帧为空")]
  Empty,
  #[error("不支持的图像格式: {0}")]
  Format(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  Image(#[from] image::ImageError),
}

/// 将 JPEG 字节解码为 RGB 帧，尺寸只取自码流本身。
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }

  let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
  match reader.format() {
    Some(ImageFormat::Jpeg) => {}
    Some(other) => return Err(DecodeError::Format(format!("{:?}", other))),
    None => return Err(DecodeError::Format("未知".to_string())),
  }

  let image = reader.decode()?.into_rgb8();
  debug!("解码帧: {}x{}", image.width(), image.height());
  Ok(Frame::from(image))
}

/// 以固定质量将帧编码为 JPEG。
pub fn encode(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
  let mut buffer = Vec::new();
  let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
  encoder.encode_image(frame.as_image())?;
  debug!(
    "编码帧: {}x{}, {} 字节",
    frame.width(),
    frame.height(),
    buffer.len()
  );
  Ok(buffer)
}
