// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/tensor.rs - 张量与分配账本
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

//! 每个张量在创建时向账本登记，析构时自动注销。
//!
//! 后端为中间激活值和参数各持有一本账，因此“调用结束时所有中间张量都已释放”
//! 与“dispose 之后参数全部释放”都可以直接从账本读出来。

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ndarray::{Array, Dimension};

#[derive(Debug, Default)]
struct LedgerInner {
  live: AtomicUsize,
  live_bytes: AtomicUsize,
  total: AtomicU64,
}

/// 张量分配账本
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
  inner: Arc<LedgerInner>,
}

impl TensorLedger {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前存活的张量数量
  pub fn live(&self) -> usize {
    self.inner.live.load(Ordering::Acquire)
  }

  /// 当前存活张量占用的字节数
  pub fn live_bytes(&self) -> usize {
    self.inner.live_bytes.load(Ordering::Acquire)
  }

  /// 账本创建以来登记过的张量总数
  pub fn total_allocations(&self) -> u64 {
    self.inner.total.load(Ordering::Acquire)
  }

  /// 登记一个张量
  pub fn track<D: Dimension>(&self, data: Array<f32, D>) -> Tensor<D> {
    let bytes = data.len() * std::mem::size_of::<f32>();
    self.inner.live.fetch_add(1, Ordering::AcqRel);
    self.inner.live_bytes.fetch_add(bytes, Ordering::AcqRel);
    self.inner.total.fetch_add(1, Ordering::AcqRel);
    Tensor {
      data,
      bytes,
      ledger: self.clone(),
    }
  }
}

/// 登记在账本上的张量，离开作用域即释放
#[derive(Debug)]
pub struct Tensor<D: Dimension> {
  data: Array<f32, D>,
  bytes: usize,
  ledger: TensorLedger,
}

impl<D: Dimension> Tensor<D> {
  /// 在同一账本上登记一个新张量
  pub fn sibling<E: Dimension>(&self, data: Array<f32, E>) -> Tensor<E> {
    self.ledger.track(data)
  }
}

impl<D: Dimension> Deref for Tensor<D> {
  type Target = Array<f32, D>;

  fn deref(&self) -> &Self::Target {
    &self.data
  }
}

impl<D: Dimension> DerefMut for Tensor<D> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.data
  }
}

impl<D: Dimension> Drop for Tensor<D> {
  fn drop(&mut self) {
    self.ledger.inner.live.fetch_sub(1, Ordering::AcqRel);
    self
      .ledger
      .inner
      .live_bytes
      .fetch_sub(self.bytes, Ordering::AcqRel);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array2, Array4};

  #[test]
  fn dropping_a_tensor_releases_its_entry() {
    let ledger = TensorLedger::new();
    {
      let a = ledger.track(Array4::<f32>::zeros((1, 4, 4, 3)));
      let _b = a.sibling(Array2::<f32>::zeros((2, 2)));
      assert_eq!(ledger.live(), 2);
      assert_eq!(ledger.live_bytes(), (48 + 4) * 4);
    }
    assert_eq!(ledger.live(), 0);
    assert_eq!(ledger.live_bytes(), 0);
    assert_eq!(ledger.total_allocations(), 2);
  }
}
