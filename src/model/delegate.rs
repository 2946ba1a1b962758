// 该文件是 Shanan SSD 项目的一部分。
// src/model/delegate.rs - 模型类型识别（CPU / EdgeTPU）
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

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::EngineError;

const TFLITE_IDENTIFIER: &[u8] = b"TFL3";

/// EdgeTPU 编译后的模型中包含的自定义算子名称
pub const EDGETPU_MARKER: &[u8] = b"edgetpu-custom-op";

#[cfg(target_os = "macos")]
pub const EDGETPU_SHARED_LIB: &str = "libedgetpu.1.dylib";
#[cfg(target_os = "windows")]
pub const EDGETPU_SHARED_LIB: &str = "edgetpu.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const EDGETPU_SHARED_LIB: &str = "libedgetpu.so.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
  Cpu,
  EdgeTpu { library: &'static str },
}

impl ModelKind {
  pub fn detect(model_data: &[u8]) -> Self {
    if contains(model_data, EDGETPU_MARKER) {
      ModelKind::EdgeTpu {
        library: EDGETPU_SHARED_LIB,
      }
    } else {
      ModelKind::Cpu
    }
  }

  pub fn banner(&self) -> &'static str {
    match self {
      ModelKind::Cpu => "**** USE CPU ONLY!! ****",
      ModelKind::EdgeTpu { .. } => "**** USE WITH TPU ****",
    }
  }
}

/// 模型文件格式，决定使用哪个推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
  TfLite,
  Onnx,
}

impl ModelFormat {
  /// TFLite flatbuffer 在偏移 4 处带有 `TFL3` 标识
  pub fn detect(model_data: &[u8]) -> Self {
    if model_data.get(4..8) == Some(TFLITE_IDENTIFIER) {
      ModelFormat::TfLite
    } else {
      ModelFormat::Onnx
    }
  }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
  !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// 已读入内存的模型文件
#[derive(Debug, Clone)]
pub struct ModelArtifact {
  path: PathBuf,
  data: Vec<u8>,
  kind: ModelKind,
  format: ModelFormat,
}

impl ModelArtifact {
  pub fn load(path: &Path) -> Result<Self, EngineError> {
    info!("加载模型文件: {}", path.display());
    let data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      data.len() as f64 / (1024.0 * 1024.0)
    );
    Ok(Self::from_bytes(path, data))
  }

  pub fn from_bytes(path: &Path, data: Vec<u8>) -> Self {
    let kind = ModelKind::detect(&data);
    let format = ModelFormat::detect(&data);
    debug!("模型类型: {:?}, 格式: {:?}", kind, format);
    Self {
      path: path.to_path_buf(),
      data,
      kind,
      format,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn kind(&self) -> ModelKind {
    self.kind
  }

  pub fn format(&self) -> ModelFormat {
    self.format
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn marker_selects_edgetpu_delegate() {
    let mut data = vec![0u8; 64];
    data.extend_from_slice(b"xxedgetpu-custom-opyy");
    let kind = ModelKind::detect(&data);
    assert_eq!(
      kind,
      ModelKind::EdgeTpu {
        library: EDGETPU_SHARED_LIB
      }
    );
    assert_eq!(kind.banner(), "**** USE WITH TPU ****");
  }

  #[test]
  fn plain_model_runs_on_cpu() {
    let kind = ModelKind::detect(b"TFL3 edgetpu-custom without suffix");
    assert_eq!(kind, ModelKind::Cpu);
    assert_eq!(kind.banner(), "**** USE CPU ONLY!! ****");
  }

  #[test]
  fn flatbuffer_identifier_selects_tflite() {
    let mut data = vec![0x1c, 0x00, 0x00, 0x00];
    data.extend_from_slice(b"TFL3\x00\x00");
    assert_eq!(ModelFormat::detect(&data), ModelFormat::TfLite);
    assert_eq!(ModelFormat::detect(b"TFL3 at the front"), ModelFormat::Onnx);
    assert_eq!(ModelFormat::detect(b"\x08\x07"), ModelFormat::Onnx);
  }

  #[test]
  fn marker_at_the_very_end_is_found() {
    assert!(matches!(
      ModelKind::detect(EDGETPU_MARKER),
      ModelKind::EdgeTpu { .. }
    ));
    assert_eq!(ModelKind::detect(b""), ModelKind::Cpu);
  }
}
