// 该文件是 Shanan SSD 项目的一部分。
// tests/pipeline.rs - 检测流水线端到端测试
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

mod common;

use std::sync::mpsc;

use shanan_ssd::{
  config::PipelineConfig,
  input::CaptureSource,
  model::{EngineError, LabelTable, TensorShape},
  output::{PANEL_HEIGHT, SaveKind, SaveSink},
  task::{Outputs, PacedDetectionTask, PipelineError, RunOutcome, Task},
  telemetry::{ConsoleLog, TIME_LOG_HEADER, TelemetryRecorder, TimeLog},
};

use common::{MemoryDisplay, SharedBuf, StubEngine, SyntheticSource, tensors};

const MODEL: TensorShape = TensorShape {
  batch: 1,
  height: 30,
  width: 30,
  channels: 3,
};

struct Harness {
  time_log: SharedBuf,
  log_file: SharedBuf,
  stdout: SharedBuf,
}

impl Harness {
  fn new() -> Self {
    Self {
      time_log: SharedBuf::default(),
      log_file: SharedBuf::default(),
      stdout: SharedBuf::default(),
    }
  }

  fn outputs(&self, with_log_file: bool) -> Outputs {
    let file: Option<Box<dyn std::io::Write>> = if with_log_file {
      Some(Box::new(self.log_file.clone()))
    } else {
      None
    };
    Outputs {
      display: None,
      save: None,
      telemetry: TelemetryRecorder::new(Some(
        TimeLog::new(Box::new(self.time_log.clone())).unwrap(),
      )),
      console: ConsoleLog::new(file, Box::new(self.stdout.clone())),
    }
  }

  fn time_rows(&self) -> Vec<String> {
    let text = self.time_log.text();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(TIME_LOG_HEADER));
    lines.map(str::to_string).collect()
  }
}

fn no_display() -> PipelineConfig {
  PipelineConfig {
    display: false,
    ..PipelineConfig::default()
  }
}

#[test]
fn three_frames_with_one_detection() {
  let harness = Harness::new();
  let engine = StubEngine::new(MODEL)
    .respond(Ok(tensors(&[([0.1, 0.1, 0.2, 0.2], 0.0, 0.3)])))
    .respond(Ok(tensors(&[([0.1, 0.2, 0.5, 0.6], 0.0, 0.9)])))
    .respond(Ok(tensors(&[])));
  let labels = LabelTable::from_lines("???\nperson\n");
  let (_tx, rx) = mpsc::channel::<()>();

  let task = PacedDetectionTask::new(no_display(), labels, rx).unwrap();
  let summary = task
    .run_task(
      SyntheticSource::new(3, 60, 40, 25.0),
      engine,
      harness.outputs(true),
    )
    .unwrap();

  assert_eq!(summary.outcome, RunOutcome::EndOfStream);
  assert_eq!(summary.frames, 3);
  assert_eq!(summary.saved, None);

  let rows = harness.time_rows();
  assert_eq!(rows.len(), 3);
  assert!(rows[0].starts_with("    1, ---, "));
  assert!(rows[1].starts_with("    2, "));
  assert!(!rows[1].contains("---"));
  // 不显示时总是最短等待
  assert!(rows.iter().all(|row| row.split(", ").nth(6) == Some("1")));

  let log = harness.log_file.text();
  let class_lines: Vec<&str> = log.lines().filter(|l| l.starts_with("Class=")).collect();
  assert_eq!(class_lines.len(), 1);
  assert_eq!(
    class_lines[0],
    "Class=person         (  1)  Confidence=0.900000  Location=(12,4)-(36,20)"
  );
  assert!(log.contains("frame_number:     2 / 3"));

  let stdout = harness.stdout.text();
  assert!(stdout.contains("frame_number:     1 / 3"));
  assert!(!stdout.contains("Class="));
}

#[test]
fn missing_labels_print_numeric_ids() {
  let harness = Harness::new();
  let engine = StubEngine::new(MODEL).respond(Ok(tensors(&[
    ([0.0, 0.0, 0.5, 0.5], 2.0, 0.7),
    ([0.0, 0.0, 0.5, 0.5], 40.0, 0.6),
  ])));
  let (_tx, rx) = mpsc::channel::<()>();

  let task = PacedDetectionTask::new(no_display(), LabelTable::default(), rx).unwrap();
  task
    .run_task(SyntheticSource::new(1, 30, 30, 0.0), engine, harness.outputs(false))
    .unwrap();

  let stdout = harness.stdout.text();
  let class_lines: Vec<&str> = stdout.lines().filter(|l| l.starts_with("Class=")).collect();
  assert_eq!(class_lines.len(), 2);
  assert!(class_lines[0].starts_with("Class=3              (  3)"));
  assert!(class_lines[1].starts_with("Class=41             ( 41)"));
}

#[test]
fn still_image_is_saved_once_without_an_encoder() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("out.png");
  let harness = Harness::new();
  let source = SyntheticSource::new(1, 48, 32, 0.0);

  let mut outputs = harness.outputs(false);
  outputs.save = Some(SaveSink::open(&path, source.info(), 48, 32 + PANEL_HEIGHT).unwrap());

  let (_tx, rx) = mpsc::channel::<()>();
  let task = PacedDetectionTask::new(no_display(), LabelTable::default(), rx).unwrap();
  let summary = task
    .run_task(source, StubEngine::new(MODEL), outputs)
    .unwrap();

  let saved = summary.saved.unwrap();
  assert_eq!(saved.kind, SaveKind::StillImage);
  assert_eq!(saved.frames_written, 1);
  let image = image::open(&path).unwrap();
  assert_eq!((image.width(), image.height()), (48, 32 + PANEL_HEIGHT));
}

#[test]
fn still_image_on_display_waits_for_cancellation() {
  let harness = Harness::new();
  let display = MemoryDisplay::default();
  let mut outputs = harness.outputs(false);
  outputs.display = Some(Box::new(display.clone()));

  // 发送端已关闭，无限等待立即视为取消
  let (tx, rx) = mpsc::channel::<()>();
  drop(tx);

  let task = PacedDetectionTask::new(PipelineConfig::default(), LabelTable::default(), rx).unwrap();
  let summary = task
    .run_task(SyntheticSource::new(1, 20, 10, 0.0), StubEngine::new(MODEL), outputs)
    .unwrap();

  assert_eq!(summary.outcome, RunOutcome::Cancelled);
  assert_eq!(summary.frames, 1);
  assert_eq!(*display.frames.lock().unwrap(), vec![(20, 10 + PANEL_HEIGHT)]);
  assert!(*display.finished.lock().unwrap());

  let rows = harness.time_rows();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].split(", ").nth(6), Some("0"));
}

#[test]
fn displayed_video_is_paced_to_the_source_rate() {
  let harness = Harness::new();
  let display = MemoryDisplay::default();
  let mut outputs = harness.outputs(false);
  outputs.display = Some(Box::new(display.clone()));
  let (_tx, rx) = mpsc::channel::<()>();

  let task = PacedDetectionTask::new(PipelineConfig::default(), LabelTable::default(), rx).unwrap();
  let summary = task
    .run_task(SyntheticSource::new(5, 60, 40, 25.0), StubEngine::new(MODEL), outputs)
    .unwrap();

  assert_eq!(summary.outcome, RunOutcome::EndOfStream);
  assert_eq!(display.frames.lock().unwrap().len(), 5);

  let rows = harness.time_rows();
  assert_eq!(rows.len(), 5);
  for row in &rows {
    let fields: Vec<&str> = row.split(", ").collect();
    let code: u64 = fields[6].parse().unwrap();
    // 每帧处理远快于 40 ms，应按剩余时间等待
    assert!(code > 1, "wait code {} in {:?}", code, row);
    assert!(code <= 40, "wait code {} in {:?}", code, row);
  }
  for row in &rows[1..] {
    let frame_ms: f64 = row.split(", ").nth(1).unwrap().parse().unwrap();
    assert!(frame_ms >= 39.5, "frame time {} in {:?}", frame_ms, row);
  }
}

#[test]
fn cancellation_stops_after_the_current_frame() {
  let harness = Harness::new();
  let (tx, rx) = mpsc::channel::<()>();
  tx.send(()).unwrap();

  let task = PacedDetectionTask::new(no_display(), LabelTable::default(), rx).unwrap();
  let summary = task
    .run_task(SyntheticSource::live(5, 30, 30), StubEngine::new(MODEL), harness.outputs(false))
    .unwrap();

  assert_eq!(summary.outcome, RunOutcome::Cancelled);
  assert_eq!(summary.frames, 1);
  assert_eq!(harness.time_rows().len(), 1);
  assert!(harness.stdout.text().contains("frame_number:     1 / -1"));
}

#[test]
fn engine_failure_aborts_and_flushes() {
  let harness = Harness::new();
  let engine = StubEngine::new(MODEL)
    .respond(Ok(tensors(&[])))
    .respond(Err(EngineError::Backend("device lost".to_string())));
  let calls = engine.calls.clone();
  let (_tx, rx) = mpsc::channel::<()>();

  let task = PacedDetectionTask::new(no_display(), LabelTable::default(), rx).unwrap();
  let err = task
    .run_task(SyntheticSource::new(4, 30, 30, 30.0), engine, harness.outputs(true))
    .unwrap_err();

  assert!(matches!(err, PipelineError::Engine(EngineError::Backend(_))));
  assert_eq!(*calls.lock().unwrap(), 2);
  assert_eq!(harness.time_rows().len(), 1);
}

#[test]
fn malformed_model_shape_fails_before_the_first_frame() {
  let harness = Harness::new();
  let engine = StubEngine::new(TensorShape::nhwc(300, 300, 1));
  let calls = engine.calls.clone();
  let (_tx, rx) = mpsc::channel::<()>();

  let task = PacedDetectionTask::new(no_display(), LabelTable::default(), rx).unwrap();
  let err = task
    .run_task(SyntheticSource::new(2, 30, 30, 30.0), engine, harness.outputs(false))
    .unwrap_err();

  assert!(matches!(err, PipelineError::Engine(EngineError::InvalidShape(_))));
  assert_eq!(*calls.lock().unwrap(), 0);
  assert!(harness.time_rows().is_empty());
  assert!(harness.stdout.text().is_empty());
}

#[test]
fn threshold_outside_unit_range_is_rejected() {
  let (_tx, rx) = mpsc::channel::<()>();
  let config = PipelineConfig {
    threshold: -0.1,
    ..PipelineConfig::default()
  };
  assert!(matches!(
    PacedDetectionTask::new(config, LabelTable::default(), rx),
    Err(PipelineError::Config(_))
  ));
}
