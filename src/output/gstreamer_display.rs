// 该文件是 Shanan SSD 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示
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

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use super::{FrameSink, OutputError};

const DISPLAY_PIPELINE: &str = "appsrc name=src ! videoconvert ! autovideosink sync=false";

#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法将元素转换为 appsrc")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 显示窗口；appsrc 按帧序号打时间戳，autovideosink 不做同步，节奏由调用方控制
pub struct GStreamerDisplay {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: u64,
  frame_count: u64,
}

impl GStreamerDisplay {
  pub fn open(width: u32, height: u32, fps: f64) -> Result<Self, GStreamerDisplayError> {
    gst::init()?;

    let fps = if fps.is_finite() && fps >= 1.0 {
      fps.round() as u64
    } else {
      30
    };

    info!("创建显示管道: {}", DISPLAY_PIPELINE);
    let pipeline = gst::parse::launch(DISPLAY_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayError::PipelineError("无法创建管道".to_string()))?;
    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(fps as i32, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsrc,
      fps,
      frame_count: 0,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerDisplayError> {
    let mut buffer = gst::Buffer::from_mut_slice(data.to_vec());
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerDisplayError::PipelineError("缓冲区不可写".to_string()))?;
      let timestamp = self.frame_count * 1_000_000_000 / self.fps;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / self.fps));
    }
    self.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerDisplayError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }
}

impl FrameSink for GStreamerDisplay {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    self.push_frame(image.as_raw())?;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    let _ = self.appsrc.end_of_stream();
    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(GStreamerDisplayError::from)?;
    Ok(())
  }
}

impl Drop for GStreamerDisplay {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止显示管道: {}", e);
    }
  }
}
