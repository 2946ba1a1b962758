// 该文件是 Shanan SSD 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::info;

use super::{CaptureSource, SourceInfo};
use crate::frame::Frame;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单帧输入：产生一帧后即结束
pub struct ImageFileInput {
  info: SourceInfo,
  image: Option<RgbImage>,
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .into_rgb8();
    info!("读取图像文件: {}", path.display());
    Ok(Self::from_image(image))
  }

  pub fn from_image(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      info: SourceInfo {
        width,
        height,
        fps: 0.0,
        total_frames: Some(1),
      },
      image: Some(image),
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(Frame::from)
  }
}

impl CaptureSource for ImageFileInput {
  fn info(&self) -> &SourceInfo {
    &self.info
  }
}
