// 该文件是 Shanan SSD 项目的一部分。
// tests/common/mod.rs - 集成测试公共组件
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

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use image::RgbImage;

use shanan_ssd::{
  frame::{ChannelOrder, Frame},
  input::{CaptureSource, SourceInfo},
  model::{
    DetectionTensors, EngineError, InferenceEngine, InputTensor, TensorShape, TensorType,
  },
  output::{FrameSink, OutputError},
};

/// 内存中的可共享写入目标
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
  pub fn text(&self) -> String {
    String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
  }
}

impl Write for SharedBuf {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// 固定尺寸的合成帧序列
pub struct SyntheticSource {
  info: SourceInfo,
  remaining: u64,
}

impl SyntheticSource {
  pub fn new(frames: u64, width: u32, height: u32, fps: f64) -> Self {
    Self {
      info: SourceInfo {
        width,
        height,
        fps,
        total_frames: Some(frames),
      },
      remaining: frames,
    }
  }

  pub fn live(frames: u64, width: u32, height: u32) -> Self {
    let mut source = Self::new(frames, width, height, 0.0);
    source.info.total_frames = None;
    source
  }
}

impl Iterator for SyntheticSource {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    let (w, h) = (self.info.width, self.info.height);
    let data = vec![64u8; (w * h * 3) as usize];
    Frame::from_raw(w, h, ChannelOrder::Bgr, data).ok()
  }
}

impl CaptureSource for SyntheticSource {
  fn info(&self) -> &SourceInfo {
    &self.info
  }
}

pub type Row = ([f32; 4], f32, f32);

pub fn tensors(rows: &[Row]) -> DetectionTensors {
  DetectionTensors {
    boxes: rows.iter().flat_map(|(b, _, _)| *b).collect(),
    classes: rows.iter().map(|(_, c, _)| *c).collect(),
    scores: rows.iter().map(|(_, _, s)| *s).collect(),
    count: rows.len() as f32,
  }
}

/// 按调用顺序返回预设结果的推理引擎，预设用完后返回空结果
pub struct StubEngine {
  shape: TensorShape,
  responses: VecDeque<Result<DetectionTensors, EngineError>>,
  pub calls: Arc<Mutex<usize>>,
}

impl StubEngine {
  pub fn new(shape: TensorShape) -> Self {
    Self {
      shape,
      responses: VecDeque::new(),
      calls: Arc::default(),
    }
  }

  pub fn respond(mut self, response: Result<DetectionTensors, EngineError>) -> Self {
    self.responses.push_back(response);
    self
  }
}

impl InferenceEngine for StubEngine {
  fn name(&self) -> &'static str {
    "stub"
  }

  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  fn input_type(&self) -> TensorType {
    TensorType::UInt8
  }

  fn run(&mut self, input: &InputTensor) -> Result<DetectionTensors, EngineError> {
    *self.calls.lock().unwrap() += 1;
    if input.shape != self.shape {
      return Err(EngineError::ShapeMismatch {
        expected: self.shape,
        actual: input.shape,
      });
    }
    self
      .responses
      .pop_front()
      .unwrap_or_else(|| Ok(tensors(&[])))
  }
}

/// 记录收到的帧的显示目标
#[derive(Clone, Default)]
pub struct MemoryDisplay {
  pub frames: Arc<Mutex<Vec<(u32, u32)>>>,
  pub finished: Arc<Mutex<bool>>,
}

impl FrameSink for MemoryDisplay {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    self.frames.lock().unwrap().push(image.dimensions());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    *self.finished.lock().unwrap() = true;
    Ok(())
  }
}
