// 该文件是 Shanan SSD 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 摄像头输入
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

//! # GStreamer 摄像头输入
//!
//! 通过 `v4l2src` 采集摄像头画面，统一转换为 BGR 后由 appsink 取出。
//!
//! 需要系统安装 GStreamer 开发库，并启用 `gstreamer_input` 特性。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};

use super::{CameraSpec, CaptureSource, SourceInfo};
use crate::frame::{ChannelOrder, FRAME_CHANNELS, Frame};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法将元素转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式")]
  UnsupportedFormat,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn camera_pipeline(camera: &CameraSpec) -> String {
  let mut caps = vec!["video/x-raw".to_string()];
  if let Some(width) = camera.width {
    caps.push(format!("width={}", width));
  }
  if let Some(height) = camera.height {
    caps.push(format!("height={}", height));
  }
  if let Some(fps) = camera.fps {
    caps.push(format!("framerate={}/1", fps));
  }

  format!(
    "v4l2src device={} ! {} ! videoconvert ! video/x-raw,format=BGR ! appsink max-buffers=2 drop=true name=sink",
    camera.device,
    caps.join(",")
  )
}

/// 实时摄像头源，总帧数未知
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: SourceInfo,
  pending: Option<Frame>,
}

impl GStreamerInput {
  pub fn open(camera: &CameraSpec) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = camera_pipeline(camera);
    info!("GStreamer 管道描述: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    // 先取一帧以确定实际协商的尺寸与帧率
    let sample = appsink
      .pull_sample()
      .map_err(|e| GStreamerInputError::PipelineError(format!("无法获取首帧: {}", e)))?;
    let (frame, fps) = convert_sample(&sample)?;

    let info = SourceInfo {
      width: frame.width(),
      height: frame.height(),
      fps,
      total_frames: None,
    };

    Ok(Self {
      pipeline,
      appsink,
      info,
      pending: Some(frame),
    })
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(frame);
    }
    let sample = self
      .appsink
      .pull_sample()
      .map_err(|e| error!("获取样本失败: {}", e))
      .ok()?;
    convert_sample(&sample)
      .map(|(frame, _)| frame)
      .map_err(|e| error!("样本转换失败: {}", e))
      .ok()
  }
}

impl CaptureSource for GStreamerInput {
  fn info(&self) -> &SourceInfo {
    &self.info
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<(Frame, f64), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Bgr {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row = width * FRAME_CHANNELS;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * (height.saturating_sub(1)) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  let fps = video_info.fps();
  let fps = if fps.denom() > 0 {
    fps.numer() as f64 / fps.denom() as f64
  } else {
    0.0
  };

  let frame = Frame::from_raw(width as u32, height as u32, ChannelOrder::Bgr, pixels)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?;
  Ok((frame, fps))
}
