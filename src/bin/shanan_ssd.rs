// 该文件是 Shanan SSD 项目的一部分。
// src/bin/shanan_ssd.rs - 实时 SSD 物体检测程序
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

use anyhow::{Context, Result};
use tracing::{info, warn};

use shanan_ssd::{
  args::Args,
  config::PipelineConfig,
  input::{CaptureSource, InputSpec, InputWrapper},
  model::{LabelTable, ModelArtifact, load_engine, resolve_label_path},
  output::{PANEL_HEIGHT, SaveSink, open_display},
  pacing::install_ctrlc_handler,
  task::{Outputs, PacedDetectionTask, RunOutcome, Task},
  telemetry::{ConsoleLog, TelemetryRecorder, TimeLog},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse_from_env();
  let mut config = PipelineConfig::try_from(&args)?;

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);

  let labels = match resolve_label_path(args.labels.as_deref(), &args.model) {
    Some(path) => LabelTable::load(&path)?,
    None => {
      info!("未找到标签文件, 使用类别编号显示");
      LabelTable::default()
    }
  };

  let spec = InputSpec::parse(&args.input)?;

  let time_log = config
    .time_log_path
    .as_deref()
    .map(TimeLog::create)
    .transpose()?;

  let command = std::env::args().collect::<Vec<_>>().join(" ");
  let mut console = ConsoleLog::open(config.console_log_path.as_deref(), &command)?;

  info!("创建推理引擎...");
  let artifact = ModelArtifact::load(&args.model)
    .with_context(|| format!("无法读取模型文件 {}", args.model.display()))?;
  console.announce(artifact.kind().banner())?;
  let engine = load_engine(&artifact, args.tensor_shape(), args.tensor_type())?;

  let input = InputWrapper::open(&spec)?;
  let source = *input.info();
  let (disp_width, disp_height) = (source.width, source.height + PANEL_HEIGHT);

  let display = if config.display {
    let display = open_display(disp_width, disp_height, source.fps)?;
    if display.is_none() {
      config = config.without_display();
    }
    display
  } else {
    None
  };

  let save = config
    .save_path
    .as_deref()
    .map(|path| SaveSink::open(path, &source, disp_width, disp_height))
    .transpose()?;

  let cancel = install_ctrlc_handler().context("无法设置 Ctrl-C 处理器")?;

  let outputs = Outputs {
    display,
    save,
    telemetry: TelemetryRecorder::new(time_log),
    console,
  };

  info!("开始推理...");
  println!("To close the application, press 'CTRL+C' here");

  let task = PacedDetectionTask::new(config, labels, cancel)?;
  let summary = task.run_task(input, engine, outputs)?;

  match summary.outcome {
    RunOutcome::EndOfStream => info!("处理完成, 共 {} 帧", summary.frames),
    RunOutcome::Cancelled => warn!("用户取消, 已处理 {} 帧", summary.frames),
  }
  if let Some(saved) = summary.saved {
    info!("已保存 {:?}: {} 帧", saved.kind, saved.frames_written);
  }

  Ok(())
}
