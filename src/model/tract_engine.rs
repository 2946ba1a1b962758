// 该文件是 Shanan SSD 项目的一部分。
// src/model/tract_engine.rs - 基于 tract 的 ONNX 推理后端
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

use tract_onnx::prelude::*;
use tracing::{debug, error, info};

use super::{
  DetectionTensors, EngineError, InferenceEngine, InputTensor, ModelArtifact, ModelKind,
  TensorData, TensorShape, TensorType,
};

const SSD_NUM_OUTPUTS: usize = 4;

/// 运行四输出 SSD 模型（boxes, classes, scores, count）的 CPU 后端
pub struct TractEngine {
  plan: TypedRunnableModel<TypedModel>,
  shape: TensorShape,
  tensor_type: TensorType,
}

fn backend_error(context: &str, err: impl std::fmt::Display) -> EngineError {
  EngineError::Backend(format!("{}: {}", context, err))
}

impl TractEngine {
  pub fn load(
    artifact: &ModelArtifact,
    shape: TensorShape,
    tensor_type: TensorType,
  ) -> Result<Self, EngineError> {
    if let ModelKind::EdgeTpu { library } = artifact.kind() {
      error!("EdgeTPU 模型需要委托库 {}, tract 后端不支持", library);
      return Err(EngineError::DelegateUnavailable(library));
    }
    shape.validate()?;

    let datum_type = match tensor_type {
      TensorType::UInt8 => u8::datum_type(),
      TensorType::Float32 => f32::datum_type(),
    };

    info!("创建 tract 推理计划: {:?} {:?}", shape, tensor_type);
    let plan = tract_onnx::onnx()
      .model_for_path(artifact.path())
      .map_err(|e| backend_error("无法加载 ONNX 模型", e))?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          datum_type,
          tvec!(shape.batch, shape.height, shape.width, shape.channels),
        ),
      )
      .map_err(|e| backend_error("无法设置输入形状", e))?
      .into_optimized()
      .map_err(|e| backend_error("无法优化模型", e))?
      .into_runnable()
      .map_err(|e| backend_error("无法构建推理计划", e))?;

    let num_outputs = plan.model().outputs.len();
    if num_outputs != SSD_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      );
      return Err(EngineError::InvalidShape(format!(
        "预期模型输出数量为 {}, 实际为 {}",
        SSD_NUM_OUTPUTS, num_outputs
      )));
    }
    info!("模型加载完成");

    Ok(Self {
      plan,
      shape,
      tensor_type,
    })
  }

  fn build_input(&self, input: &InputTensor) -> Result<Tensor, EngineError> {
    if input.shape != self.shape {
      return Err(EngineError::ShapeMismatch {
        expected: self.shape,
        actual: input.shape,
      });
    }
    let dims = (
      self.shape.batch,
      self.shape.height,
      self.shape.width,
      self.shape.channels,
    );

    let tensor = match &input.data {
      TensorData::UInt8(data) if self.tensor_type == TensorType::UInt8 => {
        tract_ndarray::Array4::from_shape_vec(dims, data.to_vec())
          .map_err(|e| backend_error("输入张量构建失败", e))?
          .into_tensor()
      }
      TensorData::Float32(data) if self.tensor_type == TensorType::Float32 => {
        tract_ndarray::Array4::from_shape_vec(dims, data.to_vec())
          .map_err(|e| backend_error("输入张量构建失败", e))?
          .into_tensor()
      }
      _ => {
        return Err(EngineError::TypeMismatch {
          expected: self.tensor_type,
          actual: input.tensor_type(),
        });
      }
    };
    Ok(tensor)
  }
}

fn output_as_f32(outputs: &TVec<TValue>, index: usize) -> Result<Box<[f32]>, EngineError> {
  let tensor = outputs
    .get(index)
    .ok_or_else(|| EngineError::MalformedOutput(format!("缺少第 {} 个输出", index)))?;
  let values = tensor
    .cast_to::<f32>()
    .map_err(|e| backend_error("输出张量类型转换失败", e))?;
  let slice = values
    .as_slice::<f32>()
    .map_err(|e| backend_error("输出张量读取失败", e))?;
  Ok(slice.into())
}

impl InferenceEngine for TractEngine {
  fn name(&self) -> &'static str {
    "tract"
  }

  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  fn input_type(&self) -> TensorType {
    self.tensor_type
  }

  fn run(&mut self, input: &InputTensor) -> Result<DetectionTensors, EngineError> {
    let tensor = self.build_input(input)?;
    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| backend_error("ONNX 推理失败", e))?;

    let count = output_as_f32(&outputs, 3)?.first().copied().unwrap_or(0.0);
    Ok(DetectionTensors {
      boxes: output_as_f32(&outputs, 0)?,
      classes: output_as_f32(&outputs, 1)?,
      scores: output_as_f32(&outputs, 2)?,
      count,
    })
  }
}
