// 该文件是 Shanan SSD 项目的一部分。
// src/telemetry.rs - 每帧耗时记录与控制台日志
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

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::pacing::WaitRequest;

pub const TIME_LOG_HEADER: &str =
  "frame_number, frame_time, preprocess_time, inf_time, parse_time, render_time, wait_request, wait_time";

#[derive(Error, Debug)]
pub enum TelemetryError {
  #[error("无法创建日志文件 {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("日志写入失败: {0}")]
  Write(#[from] io::Error),
}

pub fn ms(duration: Duration) -> f64 {
  duration.as_secs_f64() * 1000.0
}

/// 单帧各阶段耗时
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
  pub frame_number: u64,
  /// 与上一帧开始时刻之差，第一帧没有
  pub frame_time: Option<Duration>,
  pub preprocess_time: Duration,
  pub inference_time: Duration,
  pub decode_time: Duration,
  pub render_time: Duration,
  pub wait: WaitRequest,
  pub wait_time: Duration,
}

impl FrameTiming {
  pub fn to_csv_row(&self) -> String {
    let frame_time = self
      .frame_time
      .map(|t| format!("{:.3}", ms(t)))
      .unwrap_or_else(|| "---".to_string());
    format!(
      "{:5}, {}, {:.3}, {:.3}, {:.3}, {:.3}, {}, {:.3}",
      self.frame_number,
      frame_time,
      ms(self.preprocess_time),
      ms(self.inference_time),
      ms(self.decode_time),
      ms(self.render_time),
      self.wait.code(),
      ms(self.wait_time)
    )
  }
}

/// 时间日志：表头加每帧一行
pub struct TimeLog {
  writer: Box<dyn Write>,
}

impl TimeLog {
  pub fn create(path: &Path) -> Result<Self, TelemetryError> {
    let file = File::create(path).map_err(|source| TelemetryError::Create {
      path: path.to_path_buf(),
      source,
    })?;
    info!("时间日志: {}", path.display());
    Self::new(Box::new(BufWriter::new(file)))
  }

  pub fn new(mut writer: Box<dyn Write>) -> Result<Self, TelemetryError> {
    writeln!(writer, "{}", TIME_LOG_HEADER)?;
    Ok(Self { writer })
  }

  pub fn record(&mut self, timing: &FrameTiming) -> Result<(), TelemetryError> {
    writeln!(self.writer, "{}", timing.to_csv_row())?;
    Ok(())
  }

  pub fn flush(&mut self) -> Result<(), TelemetryError> {
    self.writer.flush()?;
    Ok(())
  }
}

/// 逐帧转发耗时记录，保证帧号严格递增
#[derive(Default)]
pub struct TelemetryRecorder {
  time_log: Option<TimeLog>,
  last: Option<FrameTiming>,
}

impl TelemetryRecorder {
  pub fn new(time_log: Option<TimeLog>) -> Self {
    Self {
      time_log,
      last: None,
    }
  }

  pub fn record(&mut self, timing: FrameTiming) -> Result<(), TelemetryError> {
    debug_assert!(
      self
        .last
        .map(|last| last.frame_number < timing.frame_number)
        .unwrap_or(true)
    );
    if let Some(log) = self.time_log.as_mut() {
      log.record(&timing)?;
    }
    self.last = Some(timing);
    Ok(())
  }

  pub fn last(&self) -> Option<&FrameTiming> {
    self.last.as_ref()
  }

  pub fn flush(&mut self) -> Result<(), TelemetryError> {
    match self.time_log.as_mut() {
      Some(log) => log.flush(),
      None => Ok(()),
    }
  }
}

/// 控制台输出与可选日志文件
///
/// 帧号等提示同时写入标准输出与日志文件；逐条检测结果在配置了日志文件时
/// 只写入文件，否则写到标准输出。
pub struct ConsoleLog {
  file: Option<Box<dyn Write>>,
  stdout: Box<dyn Write>,
}

impl ConsoleLog {
  pub fn open(path: Option<&Path>, command: &str) -> Result<Self, TelemetryError> {
    let file = match path {
      Some(path) => {
        let file = File::create(path).map_err(|source| TelemetryError::Create {
          path: path.to_path_buf(),
          source,
        })?;
        info!("控制台日志: {}", path.display());
        let mut writer: Box<dyn Write> = Box::new(BufWriter::new(file));
        writeln!(writer, "command: {}", command)?;
        writeln!(
          writer,
          "started: {}",
          chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        Some(writer)
      }
      None => None,
    };
    Ok(Self::new(file, Box::new(io::stdout())))
  }

  pub fn new(file: Option<Box<dyn Write>>, stdout: Box<dyn Write>) -> Self {
    Self { file, stdout }
  }

  /// 同时写入标准输出与日志文件
  pub fn announce(&mut self, line: &str) -> Result<(), TelemetryError> {
    writeln!(self.stdout, "{}", line)?;
    if let Some(file) = self.file.as_mut() {
      writeln!(file, "{}", line)?;
    }
    Ok(())
  }

  /// 有日志文件时只写文件
  pub fn detail(&mut self, line: &str) -> Result<(), TelemetryError> {
    match self.file.as_mut() {
      Some(file) => writeln!(file, "{}", line)?,
      None => writeln!(self.stdout, "{}", line)?,
    }
    Ok(())
  }

  pub fn flush(&mut self) -> Result<(), TelemetryError> {
    self.stdout.flush()?;
    if let Some(file) = self.file.as_mut() {
      file.flush()?;
    }
    Ok(())
  }
}
