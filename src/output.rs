// 该文件是 Shanan SSD 项目的一部分。
// src/output.rs - 显示与保存输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::input::SourceInfo;

pub mod overlay;
pub use self::overlay::{
  OverlayRenderer, PALETTE, PANEL_HEIGHT, PanelStats, detection_line, display_name,
  palette_color,
};

mod ffmpeg_video_output;
pub use self::ffmpeg_video_output::FfmpegVideoSink;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::StillImageSink;

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{GStreamerDisplay, GStreamerDisplayError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法加载内置字体")]
  FontError,
  #[error("无法启动编码进程: {0}")]
  SpawnError(std::io::Error),
  #[error("编码错误: {0}")]
  EncoderError(String),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  DimensionMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("不支持的输出: {0}")]
  Unsupported(String),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示错误: {0}")]
  GStreamerDisplayError(#[from] GStreamerDisplayError),
}

/// 接收合成后的显示帧
pub trait FrameSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;
  /// 刷新并关闭；重复调用无副作用
  fn finish(&mut self) -> Result<(), OutputError>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(image)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
  StillImage,
  Video,
}

impl SaveKind {
  /// 单帧输入保存为图片，其余保存为视频
  pub fn for_source(info: &SourceInfo) -> Self {
    if info.is_still_image() {
      SaveKind::StillImage
    } else {
      SaveKind::Video
    }
  }
}

pub enum SaveSink {
  #[cfg(feature = "save_image_file")]
  StillImage(StillImageSink),
  Video(FfmpegVideoSink),
}

impl SaveSink {
  /// `width`/`height` 为包含面板的显示帧尺寸
  pub fn open(path: &Path, info: &SourceInfo, width: u32, height: u32) -> Result<Self, OutputError> {
    let sink = match SaveKind::for_source(info) {
      #[cfg(feature = "save_image_file")]
      SaveKind::StillImage => SaveSink::StillImage(StillImageSink::new(path)),
      #[cfg(not(feature = "save_image_file"))]
      SaveKind::StillImage => {
        return Err(OutputError::Unsupported(format!(
          "保存图像 {} 需要启用 save_image_file 特性",
          path.display()
        )));
      }
      SaveKind::Video => SaveSink::Video(FfmpegVideoSink::open(path, width, height, info.fps)?),
    };
    info!("保存结果到: {} ({:?})", path.display(), sink.kind());
    Ok(sink)
  }

  pub fn kind(&self) -> SaveKind {
    match self {
      #[cfg(feature = "save_image_file")]
      SaveSink::StillImage(_) => SaveKind::StillImage,
      SaveSink::Video(_) => SaveKind::Video,
    }
  }

  pub fn frames_written(&self) -> u64 {
    match self {
      #[cfg(feature = "save_image_file")]
      SaveSink::StillImage(sink) => sink.frames_written(),
      SaveSink::Video(sink) => sink.frames_written(),
    }
  }
}

impl FrameSink for SaveSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    match self {
      #[cfg(feature = "save_image_file")]
      SaveSink::StillImage(sink) => sink.write_frame(image),
      SaveSink::Video(sink) => sink.write_frame(image),
    }
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    match self {
      #[cfg(feature = "save_image_file")]
      SaveSink::StillImage(sink) => sink.finish(),
      SaveSink::Video(sink) => sink.finish(),
    }
  }
}

/// 打开显示窗口；未启用 `gstreamer_output` 时返回 `None`，按不显示处理
#[allow(unused_variables)]
pub fn open_display(
  width: u32,
  height: u32,
  fps: f64,
) -> Result<Option<Box<dyn FrameSink>>, OutputError> {
  #[cfg(feature = "gstreamer_output")]
  {
    let display = GStreamerDisplay::open(width, height, fps)?;
    Ok(Some(Box::new(display)))
  }
  #[cfg(not(feature = "gstreamer_output"))]
  {
    tracing::warn!("未启用 gstreamer_output 特性，无法显示画面，按 --no_disp 运行");
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn info(total_frames: Option<u64>) -> SourceInfo {
    SourceInfo {
      width: 320,
      height: 240,
      fps: 30.0,
      total_frames,
    }
  }

  #[test]
  fn single_frame_sources_save_still_images() {
    assert_eq!(SaveKind::for_source(&info(Some(1))), SaveKind::StillImage);
    assert_eq!(SaveKind::for_source(&info(Some(300))), SaveKind::Video);
    assert_eq!(SaveKind::for_source(&info(None)), SaveKind::Video);
  }

  #[cfg(feature = "save_image_file")]
  #[test]
  fn still_image_save_never_starts_an_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jpg");
    let mut sink = SaveSink::open(&path, &info(Some(1)), 320, 240 + PANEL_HEIGHT).unwrap();
    assert_eq!(sink.kind(), SaveKind::StillImage);
    sink.write_frame(&RgbImage::new(320, 240 + PANEL_HEIGHT)).unwrap();
    sink.finish().unwrap();
    assert_eq!(sink.frames_written(), 1);
    assert!(path.is_file());
  }
}
