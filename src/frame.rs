// 该文件是 Shanan SSD 项目的一部分。
// src/frame.rs - 捕获帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const FRAME_CHANNELS: usize = 3;

/// 捕获源输出的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  /// 解码后的视频流与摄像头默认输出 BGR
  Bgr,
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  InvalidSize(u32, u32),
}

/// 一帧 HWC 排布的三通道图像，每轮循环由捕获源重新产生
#[derive(Debug, Clone)]
pub struct Frame {
  width: u32,
  height: u32,
  order: ChannelOrder,
  data: Box<[u8]>,
}

impl Frame {
  pub fn from_raw(
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidSize(width, height));
    }

    let expected = FRAME_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      order,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  /// 按 RGB 顺序读取像素
  pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * FRAME_CHANNELS;
    let px = &self.data[idx..idx + FRAME_CHANNELS];
    match self.order {
      ChannelOrder::Rgb => [px[0], px[1], px[2]],
      ChannelOrder::Bgr => [px[2], px[1], px[0]],
    }
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      order: ChannelOrder::Rgb,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for Frame {
  fn to_rgb_image(&self) -> RgbImage {
    match self.order {
      ChannelOrder::Rgb => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
        .unwrap_or_else(|| RgbImage::new(self.width, self.height)),
      // BGR -> RGB
      ChannelOrder::Bgr => {
        ImageBuffer::from_fn(self.width, self.height, |x, y| Rgb(self.rgb_at(x, y)))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_buffer_length() {
    let err = Frame::from_raw(2, 2, ChannelOrder::Bgr, vec![0; 11]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::SizeMismatch {
        expected: 12,
        actual: 11
      }
    ));
  }

  #[test]
  fn bgr_frame_is_reordered_for_display() {
    let frame = Frame::from_raw(1, 1, ChannelOrder::Bgr, vec![10, 20, 30]).unwrap();
    assert_eq!(frame.rgb_at(0, 0), [30, 20, 10]);
    assert_eq!(frame.to_rgb_image().get_pixel(0, 0), &Rgb([30, 20, 10]));
  }

  #[test]
  fn rgb_image_round_trips_without_copy_reorder() {
    let image = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
    let frame = Frame::from(image.clone());
    assert_eq!(frame.order(), ChannelOrder::Rgb);
    assert_eq!(frame.to_rgb_image(), image);
  }
}
