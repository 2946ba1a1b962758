// 该文件是 Shanan SSD 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod ffmpeg_input;
pub use self::ffmpeg_input::{FfmpegInput, FfmpegInputError, parse_frame_rate};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";

/// 捕获源的静态属性
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
  pub width: u32,
  pub height: u32,
  /// 原始帧率，未知时为 0
  pub fps: f64,
  /// 总帧数，实时源为 `None`
  pub total_frames: Option<u64>,
}

impl SourceInfo {
  pub fn is_still_image(&self) -> bool {
    self.total_frames == Some(1)
  }

  pub fn total_label(&self) -> FrameTotal {
    FrameTotal(self.total_frames)
  }
}

/// 帧总数的显示形式，未知时显示 -1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTotal(pub Option<u64>);

impl fmt::Display for FrameTotal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0 {
      Some(n) => write!(f, "{}", n),
      None => write!(f, "-1"),
    }
  }
}

/// 帧生产者：迭代结束即视为流结束
pub trait CaptureSource: Iterator<Item = Frame> {
  fn info(&self) -> &SourceInfo;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("指定的输入文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("URI 解析错误: {0}")]
  UrlError(#[from] url::ParseError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("不支持的输入: {0}")]
  Unsupported(String),
  #[error("FFmpeg 输入错误: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 摄像头描述: `gst://camera/dev/video0?width=640&height=480&fps=30`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSpec {
  pub device: String,
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub fps: Option<u32>,
}

impl Default for CameraSpec {
  fn default() -> Self {
    Self {
      device: DEFAULT_CAMERA_DEVICE.to_string(),
      width: None,
      height: None,
      fps: None,
    }
  }
}

impl FromUrlWithScheme for CameraSpec {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for CameraSpec {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("camera") {
      return Err(InputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let number = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());

    let device = match url.path() {
      "" | "/" => DEFAULT_CAMERA_DEVICE.to_string(),
      path => path.to_string(),
    };

    Ok(CameraSpec {
      device,
      width: number("width"),
      height: number("height"),
      fps: number("fps"),
    })
  }
}

/// 命令行 `--input` 的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
  Camera(CameraSpec),
  ImageFile(PathBuf),
  VideoFile(PathBuf),
}

impl InputSpec {
  pub fn parse(input: &str) -> Result<Self, InputError> {
    if input == "cam" {
      return Ok(InputSpec::Camera(CameraSpec::default()));
    }
    if input.starts_with("gst://") {
      let url = Url::parse(input)?;
      return Ok(InputSpec::Camera(CameraSpec::from_url(&url)?));
    }

    let path = std::path::absolute(input).unwrap_or_else(|_| PathBuf::from(input));
    if !path.is_file() {
      return Err(InputError::NotFound(path));
    }
    if is_image_path(&path) {
      Ok(InputSpec::ImageFile(path))
    } else {
      Ok(InputSpec::VideoFile(path))
    }
  }
}

fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

pub enum InputWrapper {
  Ffmpeg(FfmpegInput),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerInput),
}

impl InputWrapper {
  pub fn open(spec: &InputSpec) -> Result<Self, InputError> {
    let input = match spec {
      InputSpec::VideoFile(path) => InputWrapper::Ffmpeg(FfmpegInput::open(path)?),
      #[cfg(feature = "read_image_file")]
      InputSpec::ImageFile(path) => InputWrapper::ImageFile(ImageFileInput::open(path)?),
      #[cfg(not(feature = "read_image_file"))]
      InputSpec::ImageFile(path) => InputWrapper::Ffmpeg(FfmpegInput::open(path)?),
      #[cfg(feature = "gstreamer_input")]
      InputSpec::Camera(camera) => InputWrapper::GStreamer(GStreamerInput::open(camera)?),
      #[cfg(not(feature = "gstreamer_input"))]
      InputSpec::Camera(camera) => {
        return Err(InputError::Unsupported(format!(
          "摄像头 {} 需要启用 gstreamer_input 特性",
          camera.device
        )));
      }
    };

    let info = input.info();
    info!(
      "输入源已打开: {}x{} @ {:.2} fps, 总帧数 {}",
      info.width,
      info.height,
      info.fps,
      info.total_label()
    );
    Ok(input)
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::Ffmpeg(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(input) => input.next(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.next(),
    }
  }
}

impl CaptureSource for InputWrapper {
  fn info(&self) -> &SourceInfo {
    match self {
      InputWrapper::Ffmpeg(input) => input.info(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(input) => input.info(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamer(input) => input.info(),
    }
  }
}
