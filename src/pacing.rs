// 该文件是 Shanan SSD 项目的一部分。
// src/pacing.rs - 帧间等待与取消信号
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

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

const FORCED_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 一次帧间等待请求
///
/// 记录到时间日志中的是 [`WaitRequest::code`]：`0` 表示无限等待，
/// 其余为毫秒数，最短为 `1`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitRequest {
  Minimum,
  Indefinite,
  Millis(u64),
}

impl WaitRequest {
  pub fn code(&self) -> u64 {
    match self {
      WaitRequest::Minimum => 1,
      WaitRequest::Indefinite => 0,
      WaitRequest::Millis(ms) => *ms,
    }
  }

  /// `None` 表示无限等待
  pub fn timeout(&self) -> Option<Duration> {
    match self {
      WaitRequest::Minimum => Some(Duration::from_millis(1)),
      WaitRequest::Indefinite => None,
      WaitRequest::Millis(ms) => Some(Duration::from_millis(*ms)),
    }
  }
}

/// 按源帧率计算帧间等待
#[derive(Debug, Clone, Copy)]
pub struct PacingController {
  native_interval: Duration,
  display: bool,
  still_image: bool,
}

impl PacingController {
  pub fn new(fps: f64, display: bool, still_image: bool) -> Self {
    let native_interval = if fps.is_finite() && fps > 0.0 {
      Duration::from_secs_f64(1.0 / fps)
    } else {
      Duration::ZERO
    };
    Self {
      native_interval,
      display,
      still_image,
    }
  }

  pub fn native_interval(&self) -> Duration {
    self.native_interval
  }

  /// `elapsed` 为本轮迭代开始至今的耗时
  pub fn compute_wait(&self, elapsed: Duration) -> WaitRequest {
    if !self.display {
      return WaitRequest::Minimum;
    }
    if self.still_image {
      return WaitRequest::Indefinite;
    }
    if elapsed >= self.native_interval {
      return WaitRequest::Minimum;
    }

    // 毫秒向上取整
    let remaining = (self.native_interval - elapsed).as_nanos();
    let ms = remaining.div_ceil(1_000_000) as u64;
    WaitRequest::Millis(ms.max(1))
  }
}

/// 帧间等待时监听取消信号
pub trait Cancellation {
  /// 返回 `true` 表示收到取消信号
  fn wait(&self, request: WaitRequest) -> bool;
}

impl Cancellation for Receiver<()> {
  fn wait(&self, request: WaitRequest) -> bool {
    match request.timeout() {
      Some(timeout) => match self.recv_timeout(timeout) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
          // 发送端已不存在，仍然保持帧间节奏
          thread::sleep(timeout);
          false
        }
      },
      None => {
        let cancelled = self.recv();
        if cancelled.is_err() {
          debug!("取消信号通道已关闭");
        }
        true
      }
    }
  }
}

/// 安装 Ctrl-C 处理器；收到信号后 30 秒仍未退出则强制结束进程
pub fn install_ctrlc_handler() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCED_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn waits_out_the_rest_of_the_frame() {
    let pacing = PacingController::new(25.0, true, false);
    assert_eq!(
      pacing.compute_wait(Duration::from_millis(10)),
      WaitRequest::Millis(30)
    );
    assert_eq!(
      pacing.compute_wait(Duration::from_micros(10_500)),
      WaitRequest::Millis(30)
    );
    assert_eq!(
      pacing.compute_wait(Duration::from_micros(10_001)),
      WaitRequest::Millis(30)
    );
  }

  #[test]
  fn behind_schedule_uses_minimum() {
    let pacing = PacingController::new(25.0, true, false);
    assert_eq!(
      pacing.compute_wait(Duration::from_millis(50)),
      WaitRequest::Minimum
    );
    assert_eq!(
      pacing.compute_wait(Duration::from_millis(40)),
      WaitRequest::Minimum
    );
  }

  #[test]
  fn no_display_never_waits() {
    let pacing = PacingController::new(25.0, false, true);
    assert_eq!(pacing.compute_wait(Duration::ZERO), WaitRequest::Minimum);
  }

  #[test]
  fn still_image_waits_indefinitely() {
    let pacing = PacingController::new(0.0, true, true);
    let wait = pacing.compute_wait(Duration::from_millis(3));
    assert_eq!(wait, WaitRequest::Indefinite);
    assert_eq!(wait.code(), 0);
    assert_eq!(wait.timeout(), None);
  }

  #[test]
  fn unknown_fps_has_zero_interval() {
    let pacing = PacingController::new(f64::NAN, true, false);
    assert_eq!(pacing.native_interval(), Duration::ZERO);
    assert_eq!(pacing.compute_wait(Duration::ZERO), WaitRequest::Minimum);
  }

  #[test]
  fn channel_reports_cancellation() {
    let (tx, rx) = mpsc::channel();
    assert!(!rx.wait(WaitRequest::Minimum));
    tx.send(()).unwrap();
    assert!(rx.wait(WaitRequest::Millis(5)));
    drop(tx);
    assert!(!rx.wait(WaitRequest::Minimum));
    assert!(rx.wait(WaitRequest::Indefinite));
  }
}
