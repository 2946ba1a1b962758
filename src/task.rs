// 该文件是 Shanan SSD 项目的一部分。
// src/task.rs - 逐帧检测流水线
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, PipelineConfig},
  frame::Frame,
  input::{CaptureSource, FrameTotal},
  model::{
    Detection, DetectionDecoder, DetectionTensors, EngineError, InferenceEngine, InputTensor,
    LabelTable, Preprocessor,
  },
  output::{FrameSink, OutputError, OverlayRenderer, PanelStats, SaveKind, SaveSink, detection_line},
  pacing::{Cancellation, PacingController, WaitRequest},
  telemetry::{ConsoleLog, FrameTiming, TelemetryError, TelemetryRecorder},
};

pub trait Task<I, M, O>: Sized {
  type Summary;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Summary, Self::Error>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("推理错误: {0}")]
  Engine(#[from] EngineError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("日志错误: {0}")]
  Telemetry(#[from] TelemetryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  EndOfStream,
  Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
  pub kind: SaveKind,
  pub frames_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub outcome: RunOutcome,
  pub frames: u64,
  pub saved: Option<SaveSummary>,
}

/// 流水线写出的所有目标
pub struct Outputs {
  pub display: Option<Box<dyn FrameSink>>,
  pub save: Option<SaveSink>,
  pub telemetry: TelemetryRecorder,
  pub console: ConsoleLog,
}

impl Outputs {
  /// 依次关闭所有目标，返回遇到的第一个错误
  fn close(&mut self) -> Result<(), PipelineError> {
    let mut first: Option<PipelineError> = None;
    let mut keep = |result: Result<(), PipelineError>| {
      if let Err(e) = result {
        warn!("关闭输出失败: {}", e);
        first.get_or_insert(e);
      }
    };

    keep(self.telemetry.flush().map_err(PipelineError::from));
    keep(self.console.flush().map_err(PipelineError::from));
    if let Some(save) = self.save.as_mut() {
      keep(save.finish().map_err(PipelineError::from));
    }
    if let Some(sink) = self.display.as_mut() {
      keep(sink.finish().map_err(PipelineError::from));
    }

    match first {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn save_summary(&self) -> Option<SaveSummary> {
    self.save.as_ref().map(|save| SaveSummary {
      kind: save.kind(),
      frames_written: save.frames_written(),
    })
  }
}

enum Stage {
  AwaitingFrame,
  Preprocessing(Frame),
  Inferring(Frame, InputTensor),
  Decoding(Frame, DetectionTensors),
  Rendering(Frame, Vec<Detection>),
  Pacing,
  Terminated(RunOutcome),
}

/// 跨帧保存的计时状态
struct Session {
  frame_number: u64,
  frames: u64,
  total: FrameTotal,
  iteration_start: Instant,
  previous_start: Option<Instant>,
  frame_time: Option<Duration>,
  preprocess_time: Duration,
  inference_time: Duration,
  decode_time: Duration,
  render_time: Duration,
  last_render_time: Duration,
}

impl Session {
  fn new(total: FrameTotal) -> Self {
    Self {
      frame_number: 1,
      frames: 0,
      total,
      iteration_start: Instant::now(),
      previous_start: None,
      frame_time: None,
      preprocess_time: Duration::ZERO,
      inference_time: Duration::ZERO,
      decode_time: Duration::ZERO,
      render_time: Duration::ZERO,
      last_render_time: Duration::ZERO,
    }
  }

  fn begin_iteration(&mut self) {
    let now = Instant::now();
    self.frame_time = self.previous_start.map(|previous| now - previous);
    self.previous_start = Some(now);
    self.iteration_start = now;
  }

  fn panel(&self) -> PanelStats {
    PanelStats {
      frame_number: self.frame_number,
      total: self.total,
      inference_time: self.inference_time,
      decode_time: self.decode_time,
      render_time: self.last_render_time,
      frame_time: self.frame_time,
    }
  }

  fn finish_frame(&mut self, wait: WaitRequest, wait_time: Duration) -> FrameTiming {
    let timing = FrameTiming {
      frame_number: self.frame_number,
      frame_time: self.frame_time,
      preprocess_time: self.preprocess_time,
      inference_time: self.inference_time,
      decode_time: self.decode_time,
      render_time: self.render_time,
      wait,
      wait_time,
    };
    self.last_render_time = self.render_time;
    self.frames += 1;
    self.frame_number += 1;
    timing
  }
}

/// 按源帧率逐帧执行 预处理 → 推理 → 解码 → 绘制 → 等待
pub struct PacedDetectionTask<K> {
  config: PipelineConfig,
  labels: LabelTable,
  renderer: OverlayRenderer,
  cancel: K,
}

impl<K: Cancellation> PacedDetectionTask<K> {
  pub fn new(config: PipelineConfig, labels: LabelTable, cancel: K) -> Result<Self, PipelineError> {
    config.validate()?;
    Ok(Self {
      config,
      labels,
      renderer: OverlayRenderer::new()?,
      cancel,
    })
  }

  fn run_loop<I: CaptureSource, M: InferenceEngine>(
    &self,
    input: &mut I,
    model: &mut M,
    outputs: &mut Outputs,
  ) -> Result<(RunOutcome, u64), PipelineError> {
    let preprocessor = Preprocessor::new(model.input_shape(), model.input_type())?;
    let info = *input.info();
    let show = self.config.display && outputs.display.is_some();
    let pacing = PacingController::new(info.fps, show, info.is_still_image());
    debug!(
      "源帧间隔 {:?}, 显示 {}, 单帧 {}",
      pacing.native_interval(),
      show,
      info.is_still_image()
    );

    let mut session = Session::new(info.total_label());
    let mut stage = Stage::AwaitingFrame;

    loop {
      stage = match stage {
        Stage::AwaitingFrame => {
          session.begin_iteration();
          match input.next() {
            Some(frame) => {
              outputs.console.announce(&format!(
                "frame_number: {:5} / {}",
                session.frame_number, session.total
              ))?;
              Stage::Preprocessing(frame)
            }
            None => {
              info!("输入流结束, 共处理 {} 帧", session.frames);
              Stage::Terminated(RunOutcome::EndOfStream)
            }
          }
        }
        Stage::Preprocessing(frame) => {
          let tensor = preprocessor.run(&frame);
          // 包含取帧耗时
          session.preprocess_time = session.iteration_start.elapsed();
          Stage::Inferring(frame, tensor)
        }
        Stage::Inferring(frame, tensor) => {
          let started = Instant::now();
          let output = model.run(&tensor)?;
          session.inference_time = started.elapsed();
          Stage::Decoding(frame, output)
        }
        Stage::Decoding(frame, output) => {
          let started = Instant::now();
          let decoder = DetectionDecoder::new(
            self.config.threshold,
            preprocessor.shape(),
            frame.width(),
            frame.height(),
          );
          let detections = decoder.decode(&output)?;
          for detection in &detections {
            outputs
              .console
              .detail(&detection_line(detection, &self.labels))?;
          }
          session.decode_time = started.elapsed();
          Stage::Rendering(frame, detections)
        }
        Stage::Rendering(frame, detections) => {
          let started = Instant::now();
          let image = self
            .renderer
            .compose(&frame, &detections, &self.labels, &session.panel());
          if show && let Some(sink) = outputs.display.as_mut() {
            sink.write_frame(&image)?;
          }
          if let Some(save) = outputs.save.as_mut() {
            save.write_frame(&image)?;
          }
          session.render_time = started.elapsed();
          Stage::Pacing
        }
        Stage::Pacing => {
          let wait = pacing.compute_wait(session.iteration_start.elapsed());
          let started = Instant::now();
          let cancelled = self.cancel.wait(wait);
          let wait_time = started.elapsed();

          let timing = session.finish_frame(wait, wait_time);
          debug!(
            "第 {} 帧完成: 推理 {:.2?}, 等待 {:?}",
            timing.frame_number, timing.inference_time, wait
          );
          outputs.telemetry.record(timing)?;

          if cancelled {
            info!("收到取消信号, 停止处理");
            Stage::Terminated(RunOutcome::Cancelled)
          } else {
            Stage::AwaitingFrame
          }
        }
        Stage::Terminated(outcome) => return Ok((outcome, session.frames)),
      };
    }
  }
}

impl<I, M, K> Task<I, M, Outputs> for PacedDetectionTask<K>
where
  I: CaptureSource,
  M: InferenceEngine,
  K: Cancellation,
{
  type Summary = RunSummary;
  type Error = PipelineError;

  fn run_task(
    self,
    mut input: I,
    mut model: M,
    mut outputs: Outputs,
  ) -> Result<Self::Summary, Self::Error> {
    info!("开始任务, 使用 {} 推理后端", model.name());
    match self.run_loop(&mut input, &mut model, &mut outputs) {
      Ok((outcome, frames)) => {
        outputs.close()?;
        let summary = RunSummary {
          outcome,
          frames,
          saved: outputs.save_summary(),
        };
        info!("任务结束: {:?}", summary);
        Ok(summary)
      }
      Err(e) => {
        error!("流水线中止: {}", e);
        // 已有错误时关闭失败只记录日志
        let _ = outputs.close();
        Err(e)
      }
    }
  }
}
