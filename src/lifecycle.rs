// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/lifecycle.rs - 生命周期状态机
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

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Uninitialized → Initializing → Ready → Disposed，构造失败进入 Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ServiceState {
  #[default]
  Uninitialized,
  Initializing,
  Ready,
  Failed,
  Disposed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
  #[error("当前状态 {0:?} 下不可执行该操作")]
  NotReady(ServiceState),
  #[error("初始化已失败，实例不可再用")]
  Failed,
  #[error("实例已释放")]
  Disposed,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
  state: ServiceState,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> ServiceState {
    self.state
  }

  pub fn is_ready(&self) -> bool {
    self.state == ServiceState::Ready
  }

  /// 返回 `true` 表示调用方需要执行构造；已在构造中或已就绪时返回 `false`
  pub fn begin_initialize(&mut self) -> Result<bool, LifecycleError> {
    match self.state {
      ServiceState::Uninitialized => {
        self.state = ServiceState::Initializing;
        Ok(true)
      }
      ServiceState::Initializing | ServiceState::Ready => {
        debug!("重复初始化，跳过构造 (状态: {:?})", self.state);
        Ok(false)
      }
      ServiceState::Failed => Err(LifecycleError::Failed),
      ServiceState::Disposed => Err(LifecycleError::Disposed),
    }
  }

  pub fn finish_initialize(&mut self, succeeded: bool) {
    if self.state != ServiceState::Initializing {
      warn!("状态 {:?} 下结束初始化，忽略", self.state);
      return;
    }
    self.state = if succeeded {
      ServiceState::Ready
    } else {
      ServiceState::Failed
    };
  }

  pub fn ensure_ready(&self) -> Result<(), LifecycleError> {
    if self.is_ready() {
      Ok(())
    } else {
      Err(LifecycleError::NotReady(self.state))
    }
  }

  /// 任何状态都可以释放，返回释放前的状态
  pub fn dispose(&mut self) -> ServiceState {
    std::mem::replace(&mut self.state, ServiceState::Disposed)
  }
}
