// 该文件是 Shanan SSD 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffprobe/ffmpeg 的视频文件输入
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

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{CaptureSource, SourceInfo};
use crate::frame::{ChannelOrder, FRAME_CHANNELS, Frame};

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("无法启动 {program}: {source}")]
  Spawn {
    program: &'static str,
    #[source]
    source: std::io::Error,
  },
  #[error("ffprobe 执行失败: {0}")]
  ProbeFailed(String),
  #[error("ffprobe 输出解析失败: {0}")]
  ProbeParse(#[from] serde_json::Error),
  #[error("文件中没有视频流")]
  NoVideoStream,
  #[error("视频尺寸无效: {0}x{1}")]
  InvalidSize(u32, u32),
  #[error("ffmpeg 标准输出不可用")]
  NoStdout,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  codec_type: Option<String>,
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
  nb_frames: Option<String>,
}

/// 解析 "30000/1001" 或 "29.97" 形式的帧率，分母为 0 时返回 `None`
pub fn parse_frame_rate(s: &str) -> Option<f64> {
  if let Some((num, den)) = s.split_once('/') {
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    return if den > 0.0 { Some(num / den) } else { None };
  }
  s.trim().parse().ok()
}

fn parse_probe(json: &[u8]) -> Result<SourceInfo, FfmpegInputError> {
  let probe: ProbeOutput = serde_json::from_slice(json)?;
  let stream = probe
    .streams
    .iter()
    .find(|s| s.codec_type.as_deref() == Some("video"))
    .ok_or(FfmpegInputError::NoVideoStream)?;

  let width = stream.width.unwrap_or(0);
  let height = stream.height.unwrap_or(0);
  if width == 0 || height == 0 {
    return Err(FfmpegInputError::InvalidSize(width, height));
  }

  let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
    .into_iter()
    .flatten()
    .filter_map(|r| parse_frame_rate(r))
    .find(|fps| fps.is_finite() && *fps > 0.0)
    .unwrap_or(0.0);

  let total_frames = stream
    .nb_frames
    .as_deref()
    .and_then(|n| n.parse::<u64>().ok())
    .filter(|n| *n > 0);

  Ok(SourceInfo {
    width,
    height,
    fps,
    total_frames,
  })
}

fn probe(path: &Path) -> Result<SourceInfo, FfmpegInputError> {
  let output = Command::new("ffprobe")
    .args([
      "-v",
      "error",
      "-select_streams",
      "v:0",
      "-print_format",
      "json",
      "-show_streams",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .output()
    .map_err(|source| FfmpegInputError::Spawn {
      program: "ffprobe",
      source,
    })?;

  if !output.status.success() {
    return Err(FfmpegInputError::ProbeFailed(
      String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ));
  }
  parse_probe(&output.stdout)
}

/// 由 ffmpeg 子进程解码为 bgr24 原始帧的视频文件输入
pub struct FfmpegInput {
  info: SourceInfo,
  child: Child,
  stdout: ChildStdout,
  frame_size: usize,
  exit_status: Option<ExitStatus>,
}

impl FfmpegInput {
  pub fn open(path: &Path) -> Result<Self, FfmpegInputError> {
    let info = probe(path)?;
    info!(
      "ffprobe: {}x{} @ {:.3} fps, 总帧数 {}",
      info.width,
      info.height,
      info.fps,
      info.total_label()
    );

    let mut child = Command::new("ffmpeg")
      .args(["-hide_banner", "-loglevel", "error", "-i"])
      .arg(path)
      .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .spawn()
      .map_err(|source| FfmpegInputError::Spawn {
        program: "ffmpeg",
        source,
      })?;
    let stdout = child.stdout.take().ok_or(FfmpegInputError::NoStdout)?;

    Ok(Self {
      info,
      child,
      stdout,
      frame_size: info.width as usize * info.height as usize * FRAME_CHANNELS,
      exit_status: None,
    })
  }

  /// 输出结束后回收 ffmpeg，非零退出说明解码中途失败
  fn finish_stream(&mut self) {
    if self.exit_status.is_some() {
      return;
    }
    match self.child.wait() {
      Ok(status) if status.success() => {
        debug!("ffmpeg 输出结束");
        self.exit_status = Some(status);
      }
      Ok(status) => {
        warn!("ffmpeg 异常退出 ({}), 视频可能未完整解码", status);
        self.exit_status = Some(status);
      }
      Err(e) => warn!("无法获取 ffmpeg 退出状态: {}", e),
    }
  }
}

impl Iterator for FfmpegInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut data = vec![0u8; self.frame_size];
    match self.stdout.read_exact(&mut data) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        self.finish_stream();
        return None;
      }
      Err(e) => {
        error!("读取 ffmpeg 输出失败: {}", e);
        self.finish_stream();
        return None;
      }
    }
    Frame::from_raw(self.info.width, self.info.height, ChannelOrder::Bgr, data)
      .map_err(|e| error!("帧构建失败: {}", e))
      .ok()
  }
}

impl CaptureSource for FfmpegInput {
  fn info(&self) -> &SourceInfo {
    &self.info
  }
}

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    if self.exit_status.is_some() {
      return;
    }
    if let Ok(None) = self.child.try_wait() {
      if let Err(e) = self.child.kill() {
        warn!("无法终止 ffmpeg 进程: {}", e);
      }
    }
    let _ = self.child.wait();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_rate_forms() {
    assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 1e-9);
    assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
    assert!((parse_frame_rate("25").unwrap() - 25.0).abs() < 1e-9);
    assert_eq!(parse_frame_rate("0/0"), None);
    assert_eq!(parse_frame_rate("abc"), None);
  }

  #[test]
  fn probe_picks_video_stream() {
    let json = br#"{
      "streams": [
        {"codec_type": "audio"},
        {"codec_type": "video", "width": 1280, "height": 720,
         "avg_frame_rate": "0/0", "r_frame_rate": "25/1", "nb_frames": "250"}
      ]
    }"#;
    let info = parse_probe(json).unwrap();
    assert_eq!((info.width, info.height), (1280, 720));
    assert_eq!(info.fps, 25.0);
    assert_eq!(info.total_frames, Some(250));
    assert!(!info.is_still_image());
  }

  #[test]
  fn probe_without_frame_count_is_unknown_total() {
    let json = br#"{"streams": [{"codec_type": "video", "width": 640, "height": 480,
      "avg_frame_rate": "30/1"}]}"#;
    let info = parse_probe(json).unwrap();
    assert_eq!(info.total_frames, None);
    assert_eq!(info.total_label().to_string(), "-1");
  }

  #[test]
  fn probe_errors() {
    assert!(matches!(
      parse_probe(br#"{"streams": []}"#),
      Err(FfmpegInputError::NoVideoStream)
    ));
    assert!(matches!(
      parse_probe(br#"{"streams": [{"codec_type": "video", "width": 0, "height": 0}]}"#),
      Err(FfmpegInputError::InvalidSize(0, 0))
    ));
    assert!(matches!(
      parse_probe(b"not json"),
      Err(FfmpegInputError::ProbeParse(_))
    ));
  }

  #[cfg(unix)]
  fn scripted(script: &str, width: u32, height: u32) -> FfmpegInput {
    let mut child = Command::new("sh")
      .args(["-c", script])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .spawn()
      .unwrap();
    let stdout = child.stdout.take().unwrap();
    FfmpegInput {
      info: SourceInfo {
        width,
        height,
        fps: 25.0,
        total_frames: None,
      },
      child,
      stdout,
      frame_size: width as usize * height as usize * FRAME_CHANNELS,
      exit_status: None,
    }
  }

  #[cfg(unix)]
  #[test]
  fn decoder_failure_is_told_apart_from_end_of_stream() {
    // 一帧完整数据 + 半帧，随后以非零状态退出
    let mut input = scripted("head -c 18 /dev/zero; exit 3", 2, 2);
    assert!(input.next().is_some());
    assert!(input.next().is_none());
    let status = input.exit_status.unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(3));
  }

  #[cfg(unix)]
  #[test]
  fn clean_exit_ends_the_stream() {
    let mut input = scripted("head -c 24 /dev/zero", 2, 2);
    assert!(input.next().is_some());
    assert!(input.next().is_some());
    assert!(input.next().is_none());
    assert!(input.exit_status.unwrap().success());
  }
}
