// 该文件是 Shanan SSD 项目的一部分。
// src/args.rs - 命令行参数
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

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::model::{TensorShape, TensorType};

/// 模型输入元素类型
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
  Uint8,
  Float32,
}

impl From<InputType> for TensorType {
  fn from(value: InputType) -> Self {
    match value {
      InputType::Uint8 => TensorType::UInt8,
      InputType::Float32 => TensorType::Float32,
    }
  }
}

/// Shanan SSD 实时物体检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径
  #[arg(short = 'm', long, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入来源
  /// 支持格式:
  /// - 图片: *.jpg, *.jpeg, *.png, *.bmp, *.gif, *.webp
  /// - 视频: *.mp4, *.avi, *.mkv 等
  /// - 摄像头: cam 或 gst://camera/dev/video0?width=640&height=480&fps=30
  #[arg(short = 'i', long, value_name = "SOURCE")]
  pub input: String,

  /// 标签文件，默认为模型文件同名的 .labels 文件
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(
    long = "prob_threshold",
    visible_alias = "pt",
    default_value_t = 0.5,
    value_name = "THRESHOLD"
  )]
  pub prob_threshold: f32,

  /// 保存结果（单帧输入保存为图片，否则保存为视频）
  #[arg(long, value_name = "FILE")]
  pub save: Option<PathBuf>,

  /// 保存每帧耗时日志
  #[arg(long, value_name = "FILE")]
  pub time: Option<PathBuf>,

  /// 保存控制台日志
  #[arg(long, value_name = "FILE")]
  pub log: Option<PathBuf>,

  /// 不显示画面
  #[arg(long = "no_disp")]
  pub no_disp: bool,

  /// ONNX 模型输入尺寸 (宽x高)，TFLite 模型从模型中读取
  #[arg(long = "input_size", default_value = "300x300", value_parser = parse_input_size, value_name = "WxH")]
  pub input_size: (usize, usize),

  /// ONNX 模型输入元素类型，TFLite 模型从模型中读取
  #[arg(long = "input_type", value_enum, default_value_t = InputType::Uint8)]
  pub input_type: InputType,
}

impl Args {
  /// 兼容单横线的 `-pt` 写法
  pub fn parse_from_env() -> Self {
    Self::parse_from(normalize_args(std::env::args_os()))
  }

  pub fn tensor_shape(&self) -> TensorShape {
    let (width, height) = self.input_size;
    TensorShape::nhwc(height, width, 3)
  }

  pub fn tensor_type(&self) -> TensorType {
    self.input_type.into()
  }
}

pub fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
  args
    .into_iter()
    .map(|arg| {
      if arg == "-pt" {
        OsString::from("--prob_threshold")
      } else {
        arg
      }
    })
    .collect()
}

fn parse_input_size(s: &str) -> Result<(usize, usize), String> {
  let (w, h) = s
    .split_once(['x', 'X'])
    .ok_or_else(|| format!("输入尺寸格式应为 宽x高: {}", s))?;
  let w: usize = w.trim().parse().map_err(|e| format!("宽度无效: {}", e))?;
  let h: usize = h.trim().parse().map_err(|e| format!("高度无效: {}", e))?;
  if w == 0 || h == 0 {
    return Err(format!("输入尺寸不能为 0: {}", s));
  }
  Ok((w, h))
}
