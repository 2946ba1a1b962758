// 该文件是 Shanan SSD 项目的一部分。
// src/model.rs - 推理引擎接口与张量定义
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

use thiserror::Error;

mod decode;
mod delegate;
mod labels;
mod preprocess;
#[cfg(feature = "backend-tflite")]
mod tflite_engine;
#[cfg(feature = "backend-tract")]
mod tract_engine;

pub use self::decode::{BoundingBox, Detection, DetectionDecoder};
pub use self::delegate::{
  EDGETPU_MARKER, EDGETPU_SHARED_LIB, ModelArtifact, ModelFormat, ModelKind,
};
pub use self::labels::{LabelError, LabelTable, default_label_path, resolve_label_path};
pub use self::preprocess::Preprocessor;
#[cfg(feature = "backend-tflite")]
pub use self::tflite_engine::{TFLITE_SHARED_LIB, TfLiteEngine};
#[cfg(feature = "backend-tract")]
pub use self::tract_engine::TractEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  UInt8,
  Float32,
}

/// NHWC 张量形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl TensorShape {
  pub fn nhwc(height: usize, width: usize, channels: usize) -> Self {
    Self {
      batch: 1,
      height,
      width,
      channels,
    }
  }

  pub fn len(&self) -> usize {
    self.batch * self.height * self.width * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.batch != 1 {
      return Err(EngineError::InvalidShape(format!(
        "仅支持 batch=1, 实际为 {}",
        self.batch
      )));
    }
    if self.height == 0 || self.width == 0 {
      return Err(EngineError::InvalidShape(format!(
        "输入空间尺寸为零: {}x{}",
        self.width, self.height
      )));
    }
    if self.channels != 3 {
      return Err(EngineError::InvalidShape(format!(
        "输入通道数应为 3, 实际为 {}",
        self.channels
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  UInt8(Box<[u8]>),
  Float32(Box<[f32]>),
}

/// 预处理后交给推理引擎的输入张量
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  pub shape: TensorShape,
  pub data: TensorData,
}

impl InputTensor {
  pub fn tensor_type(&self) -> TensorType {
    match self.data {
      TensorData::UInt8(_) => TensorType::UInt8,
      TensorData::Float32(_) => TensorType::Float32,
    }
  }

  pub fn len(&self) -> usize {
    match &self.data {
      TensorData::UInt8(data) => data.len(),
      TensorData::Float32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// SSD 后处理输出的四个张量（batch 0）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionTensors {
  /// [N, 4]，归一化 (top, left, bottom, right)
  pub boxes: Box<[f32]>,
  /// [N]，从 0 开始的类别索引
  pub classes: Box<[f32]>,
  /// [N]
  pub scores: Box<[f32]>,
  pub count: f32,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("输入形状无效: {0}")]
  InvalidShape(String),
  #[error("输入形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("输入类型不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  TypeMismatch {
    expected: TensorType,
    actual: TensorType,
  },
  #[error("当前后端无法加载 EdgeTPU 委托 ({0})")]
  DelegateUnavailable(&'static str),
  #[error("未启用支持 {0:?} 模型的推理后端")]
  NoBackend(ModelFormat),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

/// 推理引擎能力：给定输入张量，产生四个输出张量
pub trait InferenceEngine {
  fn name(&self) -> &'static str;
  fn input_shape(&self) -> TensorShape;
  fn input_type(&self) -> TensorType;
  fn run(&mut self, input: &InputTensor) -> Result<DetectionTensors, EngineError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  fn name(&self) -> &'static str {
    (**self).name()
  }

  fn input_shape(&self) -> TensorShape {
    (**self).input_shape()
  }

  fn input_type(&self) -> TensorType {
    (**self).input_type()
  }

  fn run(&mut self, input: &InputTensor) -> Result<DetectionTensors, EngineError> {
    (**self).run(input)
  }
}

/// 根据模型格式选择推理后端
///
/// TFLite 模型的输入形状和类型取自模型本身；ONNX 模型使用 `shape` 和 `tensor_type`。
#[allow(unused_variables)]
pub fn load_engine(
  artifact: &ModelArtifact,
  shape: TensorShape,
  tensor_type: TensorType,
) -> Result<Box<dyn InferenceEngine>, EngineError> {
  match artifact.format() {
    #[cfg(feature = "backend-tflite")]
    ModelFormat::TfLite => Ok(Box::new(TfLiteEngine::load(artifact)?)),
    #[cfg(feature = "backend-tract")]
    ModelFormat::Onnx => {
      shape.validate()?;
      Ok(Box::new(TractEngine::load(artifact, shape, tensor_type)?))
    }
    #[allow(unreachable_patterns)]
    format => Err(EngineError::NoBackend(format)),
  }
}
