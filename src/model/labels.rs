// 该文件是 Shanan SSD 项目的一部分。
// src/model/labels.rs - 标签表
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

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法读取标签文件 {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// 按 class_id 索引的标签名称，启动时加载一次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  labels: Box<[String]>,
}

impl LabelTable {
  pub fn load(path: &Path) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path).map_err(|source| LabelError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let table = Self::from_lines(&text);
    info!("加载标签文件: {} ({} 项)", path.display(), table.len());
    Ok(table)
  }

  pub fn from_lines(text: &str) -> Self {
    Self {
      labels: text.lines().map(|line| line.trim().to_string()).collect(),
    }
  }

  pub fn get(&self, class_id: i32) -> Option<&str> {
    usize::try_from(class_id)
      .ok()
      .and_then(|idx| self.labels.get(idx))
      .map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

pub fn default_label_path(model: &Path) -> PathBuf {
  model.with_extension("labels")
}

/// 显式指定的路径优先，否则使用模型同名的 `.labels` 文件；文件不存在时返回 `None`
pub fn resolve_label_path(explicit: Option<&Path>, model: &Path) -> Option<PathBuf> {
  let candidate = explicit
    .map(Path::to_path_buf)
    .unwrap_or_else(|| default_label_path(model));
  if candidate.is_file() {
    Some(candidate)
  } else {
    if explicit.is_some() {
      warn!("标签文件不存在: {}, 将使用类别编号显示", candidate.display());
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lines_are_trimmed_and_indexed_from_zero() {
    let table = LabelTable::from_lines("???\n person \r\nbicycle\n");
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(0), Some("???"));
    assert_eq!(table.get(1), Some("person"));
    assert_eq!(table.get(2), Some("bicycle"));
    assert_eq!(table.get(3), None);
    assert_eq!(table.get(-1), None);
  }

  #[test]
  fn default_path_swaps_extension() {
    assert_eq!(
      default_label_path(Path::new("/models/ssd_mobilenet.tflite")),
      PathBuf::from("/models/ssd_mobilenet.labels")
    );
  }

  #[test]
  fn missing_default_label_file_is_silently_absent() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.onnx");
    assert_eq!(resolve_label_path(None, &model), None);

    std::fs::write(dir.path().join("model.labels"), "a\nb\n").unwrap();
    assert_eq!(
      resolve_label_path(None, &model),
      Some(dir.path().join("model.labels"))
    );
  }
}
