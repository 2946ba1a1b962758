// 该文件是 Shanan SSD 项目的一部分。
// src/model/preprocess.rs - 输入预处理
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

use image::imageops::{self, FilterType};

use super::{EngineError, InputTensor, TensorData, TensorShape, TensorType};
use crate::frame::{Frame, ToRgbImage};

/// 缩放到模型输入尺寸、转换为 RGB、增加 batch 维度
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  shape: TensorShape,
  tensor_type: TensorType,
}

impl Preprocessor {
  pub fn new(shape: TensorShape, tensor_type: TensorType) -> Result<Self, EngineError> {
    shape.validate()?;
    Ok(Self { shape, tensor_type })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn run(&self, frame: &Frame) -> InputTensor {
    let (width, height) = (self.shape.width as u32, self.shape.height as u32);
    let rgb = frame.to_rgb_image();
    let resized = if rgb.dimensions() == (width, height) {
      rgb
    } else {
      imageops::resize(&rgb, width, height, FilterType::Triangle)
    };
    let raw = resized.into_raw();

    let data = match self.tensor_type {
      TensorType::UInt8 => TensorData::UInt8(raw.into_boxed_slice()),
      // 非 uint8 模型统一按零中心、单位尺度的输入处理
      TensorType::Float32 => TensorData::Float32(
        raw
          .into_iter()
          .map(|v| (v as f32 - 128.0) / 128.0)
          .collect(),
      ),
    };

    InputTensor {
      shape: self.shape,
      data,
    }
  }
}
