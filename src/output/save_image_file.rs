// 该文件是 Shanan SSD 项目的一部分。
// src/output/save_image_file.rs - 静态图像保存
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

use image::RgbImage;
use tracing::info;

use super::{FrameSink, OutputError};

/// 单帧输入的保存目标，每次写入都覆盖同一个文件，格式由扩展名决定
pub struct StillImageSink {
  path: PathBuf,
  frames_written: u64,
}

impl StillImageSink {
  pub fn new(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      frames_written: 0,
    }
  }

  pub fn frames_written(&self) -> u64 {
    self.frames_written
  }
}

impl FrameSink for StillImageSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    self.frames_written += 1;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}
