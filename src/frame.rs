// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/frame.rs - NHWC 图像张量定义
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

use ndarray::{Array4, ArrayView4, Ix4};
use thiserror::Error;

use crate::tensor::{Tensor, TensorLedger};

/// 模型输入的边长
pub const INPUT_SIZE: usize = 224;
pub const RGB_CHANNELS: usize = 3;

/// 像素值的取值范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelRange {
  /// [0, 1]
  Unit,
  /// [0, 255]
  Byte,
}

impl PixelRange {
  pub fn scale(&self, value: u8) -> f32 {
    match self {
      PixelRange::Unit => value as f32 / 255.0,
      PixelRange::Byte => value as f32,
    }
  }
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: [usize; 4],
    actual: [usize; 4],
  },
}

/// 形状固定为 `[1, S, S, 3]` 的图像张量
#[derive(Debug)]
pub struct ImageTensor {
  data: Tensor<Ix4>,
}

impl ImageTensor {
  pub fn new(ledger: &TensorLedger, data: Array4<f32>) -> Result<Self, FrameError> {
    let (n, h, w, c) = data.dim();
    let expected = [1, INPUT_SIZE, INPUT_SIZE, RGB_CHANNELS];
    if [n, h, w, c] != expected {
      return Err(FrameError::ShapeMismatch {
        expected,
        actual: [n, h, w, c],
      });
    }

    Ok(Self {
      data: ledger.track(data),
    })
  }

  pub fn shape(&self) -> [usize; 4] {
    let (n, h, w, c) = self.data.dim();
    [n, h, w, c]
  }

  pub fn as_nhwc(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  pub fn tensor(&self) -> &Tensor<Ix4> {
    &self.data
  }
}
