// 该文件是 Shanan SSD 项目的一部分。
// src/model/decode.rs - SSD 检测结果解码
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

use tracing::debug;

use super::{DetectionTensors, EngineError, TensorShape};

/// 原始帧坐标系下的像素框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub top: i32,
  pub left: i32,
  pub bottom: i32,
  pub right: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 模型类别索引 + 1，0 保留不用
  pub class_id: i32,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// 将模型输出还原为原始帧上的检测框。
///
/// 输出按模型给出的顺序排列，不做排序、NMS、去重或越界裁剪。
#[derive(Debug, Clone, Copy)]
pub struct DetectionDecoder {
  threshold: f32,
  model_width: usize,
  model_height: usize,
  frame_width: u32,
  frame_height: u32,
}

impl DetectionDecoder {
  pub fn new(threshold: f32, model_shape: TensorShape, frame_width: u32, frame_height: u32) -> Self {
    Self {
      threshold,
      model_width: model_shape.width,
      model_height: model_shape.height,
      frame_width,
      frame_height,
    }
  }

  pub fn decode(&self, output: &DetectionTensors) -> Result<Vec<Detection>, EngineError> {
    let rows = output.scores.len();
    if output.classes.len() < rows {
      return Err(EngineError::MalformedOutput(format!(
        "类别张量长度 {} 小于得分张量长度 {}",
        output.classes.len(),
        rows
      )));
    }
    if output.boxes.len() < rows * 4 {
      return Err(EngineError::MalformedOutput(format!(
        "检测框张量长度 {} 小于 {}",
        output.boxes.len(),
        rows * 4
      )));
    }

    let count = emitted_count(output.count, rows);
    let mut detections = Vec::with_capacity(count);

    for i in 0..count {
      let confidence = output.scores[i];
      if confidence < self.threshold {
        continue;
      }

      let class_id = output.classes[i] as i32 + 1;
      let b = &output.boxes[i * 4..i * 4 + 4];
      let bbox = BoundingBox {
        top: denormalize(b[0], self.model_height, self.frame_height),
        left: denormalize(b[1], self.model_width, self.frame_width),
        bottom: denormalize(b[2], self.model_height, self.frame_height),
        right: denormalize(b[3], self.model_width, self.frame_width),
      };

      detections.push(Detection {
        class_id,
        confidence,
        bbox,
      });
    }

    debug!("检测到 {} 个物体 (模型输出 {} 个)", detections.len(), count);
    Ok(detections)
  }
}

fn emitted_count(count: f32, rows: usize) -> usize {
  if count.is_finite() && count > 0.0 {
    (count as usize).min(rows)
  } else {
    0
  }
}

/// 先放大到模型输入尺寸，再按原始帧与模型输入的比例缩放，截断为整数
pub(crate) fn denormalize(normalized: f32, model_dim: usize, source_dim: u32) -> i32 {
  let model_dim = model_dim as f64;
  let ratio = source_dim as f64 / model_dim;
  (normalized as f64 * model_dim * ratio) as i32
}
