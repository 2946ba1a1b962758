// 该文件是 Shanan SSD 项目的一部分。
// src/config.rs - 运行配置
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

use std::path::PathBuf;

use thiserror::Error;

use crate::args::Args;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 0.0 到 1.0 之间: {0}")]
  InvalidThreshold(f32),
}

/// 启动时确定，运行期间不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub threshold: f32,
  pub display: bool,
  pub save_path: Option<PathBuf>,
  pub time_log_path: Option<PathBuf>,
  pub console_log_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      threshold: 0.5,
      display: true,
      save_path: None,
      time_log_path: None,
      console_log_path: None,
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.threshold) {
      return Err(ConfigError::InvalidThreshold(self.threshold));
    }
    Ok(())
  }

  /// 显示不可用时退化为不显示
  pub fn without_display(mut self) -> Self {
    self.display = false;
    self
  }
}

impl TryFrom<&Args> for PipelineConfig {
  type Error = ConfigError;

  fn try_from(args: &Args) -> Result<Self, Self::Error> {
    let config = PipelineConfig {
      threshold: args.prob_threshold,
      display: !args.no_disp,
      save_path: args.save.clone(),
      time_log_path: args.time.clone(),
      console_log_path: args.log.clone(),
    };
    config.validate()?;
    Ok(config)
  }
}
