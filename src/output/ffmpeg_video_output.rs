// 该文件是 Shanan SSD 项目的一部分。
// src/output/ffmpeg_video_output.rs - 通过 ffmpeg 保存视频
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

//! 视频文件输出
//!
//! 显示帧以 rgb24 原始数据写入 ffmpeg 子进程的标准输入，由 ffmpeg 编码为 H.264。
//! 需要系统安装 ffmpeg 命令行工具。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;
use tracing::{error, info, warn};

use super::{FrameSink, OutputError};

const DEFAULT_FPS: f64 = 25.0;

pub struct FfmpegVideoSink {
  path: PathBuf,
  width: u32,
  height: u32,
  child: Option<Child>,
  stdin: Option<ChildStdin>,
  frames_written: u64,
}

fn encoder_args(path: &Path, width: u32, height: u32, fps: f64) -> Vec<String> {
  let fps = if fps.is_finite() && fps > 0.0 {
    fps
  } else {
    DEFAULT_FPS
  };
  let mut args: Vec<String> = [
    "-y",
    "-loglevel",
    "error",
    "-f",
    "rawvideo",
    "-pix_fmt",
    "rgb24",
    "-s",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect();
  args.push(format!("{}x{}", width, height));
  args.push("-r".to_string());
  args.push(format!("{}", fps));
  args.extend(
    [
      "-i",
      "-",
      // yuv420p 要求宽高为偶数
      "-vf",
      "pad=ceil(iw/2)*2:ceil(ih/2)*2",
      "-c:v",
      "libx264",
      "-pix_fmt",
      "yuv420p",
      "-preset",
      "fast",
      "-crf",
      "23",
    ]
    .iter()
    .map(|s| s.to_string()),
  );
  args.push(path.to_string_lossy().into_owned());
  args
}

impl FfmpegVideoSink {
  pub fn open(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self, OutputError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut child = Command::new("ffmpeg")
      .args(encoder_args(path, width, height, fps))
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .spawn()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        OutputError::SpawnError(e)
      })?;
    let stdin = child.stdin.take().ok_or_else(|| {
      OutputError::EncoderError("ffmpeg 标准输入不可用".to_string())
    })?;

    info!(
      "视频输出: {}x{} @ {:.2} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(Self {
      path: path.to_path_buf(),
      width,
      height,
      child: Some(child),
      stdin: Some(stdin),
      frames_written: 0,
    })
  }

  pub fn frames_written(&self) -> u64 {
    self.frames_written
  }
}

impl FrameSink for FfmpegVideoSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::DimensionMismatch {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }
    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| OutputError::EncoderError("视频输出已关闭".to_string()))?;
    stdin.write_all(image.as_raw())?;
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    // 关闭标准输入，ffmpeg 随之结束编码
    drop(self.stdin.take());
    let Some(mut child) = self.child.take() else {
      return Ok(());
    };
    let status = child.wait()?;
    if !status.success() {
      error!("ffmpeg 退出状态: {}", status);
      return Err(OutputError::EncoderError(format!(
        "ffmpeg 编码 {} 失败: {}",
        self.path.display(),
        status
      )));
    }
    info!(
      "视频已保存: {} ({} 帧)",
      self.path.display(),
      self.frames_written
    );
    Ok(())
  }
}

impl Drop for FfmpegVideoSink {
  fn drop(&mut self) {
    if self.child.is_some()
      && let Err(e) = self.finish()
    {
      warn!("关闭视频输出失败: {}", e);
    }
  }
}
