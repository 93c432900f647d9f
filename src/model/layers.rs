// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/layers.rs - 网络层
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

//! 推理用的最小层集合，张量一律为 NHWC。
//!
//! 所有层只读参数、只读输入，输出登记在输入所在的账本上。

use ndarray::{Array, Array1, Array2, Array3, Array4, Axis, Dimension, Ix1, Ix2, Ix3, Ix4, ShapeBuilder, Zip, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::model::{ModelError, ProbabilityVector};
use crate::tensor::{Tensor, TensorLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Linear,
  Relu,
  Swish,
  Sigmoid,
}

impl Activation {
  pub fn apply<D: Dimension>(&self, x: &mut Array<f32, D>) {
    match self {
      Activation::Linear => {}
      Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
      Activation::Swish => x.mapv_inplace(|v| v * sigmoid(v)),
      Activation::Sigmoid => x.mapv_inplace(sigmoid),
    }
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
  Valid,
  Same,
}

impl Padding {
  /// 返回 (输出长度, 前侧填充)
  fn geometry(&self, input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    match self {
      Padding::Valid => ((input.saturating_sub(kernel)) / stride + 1, 0),
      Padding::Same => {
        let out = input.div_ceil(stride);
        let total = ((out - 1) * stride + kernel).saturating_sub(input);
        (out, total / 2)
      }
    }
  }
}

/// 逐样本的层归一化，在 `(h, w, c)` 上化为零均值单位方差
///
/// 没有可学习的缩放与平移，全零输入保持为全零。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerNorm {
  pub epsilon: f32,
}

impl Default for LayerNorm {
  fn default() -> Self {
    Self { epsilon: 1e-3 }
  }
}

impl LayerNorm {
  pub fn apply(&self, x: &mut Array4<f32>) {
    for mut sample in x.outer_iter_mut() {
      let n = sample.len().max(1) as f32;
      let mean = sample.sum() / n;
      let variance = sample.fold(0.0, |acc, v| acc + (v - mean) * (v - mean)) / n;
      let scale = (variance + self.epsilon).sqrt().recip();
      sample.mapv_inplace(|v| (v - mean) * scale);
    }
  }
}

/// 参数初始化器，固定种子保证每次构造出的网络一致
pub struct Initializer {
  rng: StdRng,
  ledger: TensorLedger,
}

impl Initializer {
  pub fn new(seed: u64, ledger: &TensorLedger) -> Self {
    Self {
      rng: StdRng::seed_from_u64(seed),
      ledger: ledger.clone(),
    }
  }

  /// Glorot 均匀分布
  pub fn glorot<Sh>(&mut self, shape: Sh, fan_in: usize, fan_out: usize) -> Array<f32, Sh::Dim>
  where
    Sh: ShapeBuilder,
  {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    let rng = &mut self.rng;
    Array::from_shape_simple_fn(shape, || rng.random_range(-limit..limit))
  }

  pub fn param<D: Dimension>(&self, data: Array<f32, D>) -> Tensor<D> {
    self.ledger.track(data)
  }
}

/// 普通卷积，卷积核按 im2col 展开为 `(k*k*cin, cout)`
#[derive(Debug)]
pub struct Conv2d {
  kernel: Tensor<Ix2>,
  bias: Tensor<Ix1>,
  size: usize,
  stride: usize,
  in_channels: usize,
  out_channels: usize,
  padding: Padding,
  norm: Option<LayerNorm>,
  activation: Activation,
}

impl Conv2d {
  pub fn new(
    init: &mut Initializer,
    in_channels: usize,
    out_channels: usize,
    size: usize,
    stride: usize,
    padding: Padding,
    activation: Activation,
  ) -> Self {
    let rows = size * size * in_channels;
    let kernel = init.glorot((rows, out_channels), rows, size * size * out_channels);
    Self {
      kernel: init.param(kernel),
      bias: init.param(Array1::zeros(out_channels)),
      size,
      stride,
      in_channels,
      out_channels,
      padding,
      norm: None,
      activation,
    }
  }

  /// 卷积与激活之间插入归一化
  pub fn with_norm(mut self, norm: LayerNorm) -> Self {
    self.norm = Some(norm);
    self
  }

  /// 1x1 逐点卷积
  pub fn pointwise(
    init: &mut Initializer,
    in_channels: usize,
    out_channels: usize,
    activation: Activation,
  ) -> Self {
    Self::new(init, in_channels, out_channels, 1, 1, Padding::Valid, activation)
  }

  pub fn out_channels(&self) -> usize {
    self.out_channels
  }

  pub fn forward(&self, x: &Tensor<Ix4>) -> Result<Tensor<Ix4>, ModelError> {
    let (n, h, w, c) = x.dim();
    if c != self.in_channels {
      return Err(ModelError::ChannelMismatch {
        expected: self.in_channels,
        actual: c,
      });
    }

    let (oh, top) = self.padding.geometry(h, self.size, self.stride);
    let (ow, left) = self.padding.geometry(w, self.size, self.stride);

    let mut out = if self.size == 1 && self.stride == 1 {
      let flat = x.view().into_shape_with_order((n * h * w, c))?;
      flat.dot(&*self.kernel)
    } else {
      let patches = x.sibling(self.im2col(x, oh, ow, top, left));
      patches.dot(&*self.kernel)
    };

    out += &*self.bias;
    let mut out = out.into_shape_with_order((n, oh, ow, self.out_channels))?;
    if let Some(norm) = &self.norm {
      norm.apply(&mut out);
    }
    self.activation.apply(&mut out);
    Ok(x.sibling(out))
  }

  fn im2col(&self, x: &Array4<f32>, oh: usize, ow: usize, top: usize, left: usize) -> Array2<f32> {
    let (n, h, w, c) = x.dim();
    let k = self.size;
    let mut patches = Array2::<f32>::zeros((n * oh * ow, k * k * c));
    for b in 0..n {
      for oy in 0..oh {
        for ox in 0..ow {
          let row = (b * oh + oy) * ow + ox;
          let mut patch = patches.row_mut(row);
          for ky in 0..k {
            let iy = (oy * self.stride + ky) as isize - top as isize;
            if iy < 0 || iy >= h as isize {
              continue;
            }
            for kx in 0..k {
              let ix = (ox * self.stride + kx) as isize - left as isize;
              if ix < 0 || ix >= w as isize {
                continue;
              }
              let offset = (ky * k + kx) * c;
              patch
                .slice_mut(s![offset..offset + c])
                .assign(&x.slice(s![b, iy as usize, ix as usize, ..]));
            }
          }
        }
      }
    }
    patches
  }
}

/// 逐通道卷积
#[derive(Debug)]
pub struct DepthwiseConv2d {
  kernel: Tensor<Ix3>,
  bias: Tensor<Ix1>,
  size: usize,
  stride: usize,
  norm: Option<LayerNorm>,
  activation: Activation,
}

impl DepthwiseConv2d {
  pub fn new(
    init: &mut Initializer,
    channels: usize,
    size: usize,
    stride: usize,
    activation: Activation,
  ) -> Self {
    let fan = size * size;
    let kernel: Array3<f32> = init.glorot((size, size, channels), fan, fan);
    Self {
      kernel: init.param(kernel),
      bias: init.param(Array1::zeros(channels)),
      size,
      stride,
      norm: None,
      activation,
    }
  }

  pub fn with_norm(mut self, norm: LayerNorm) -> Self {
    self.norm = Some(norm);
    self
  }

  pub fn forward(&self, x: &Tensor<Ix4>) -> Result<Tensor<Ix4>, ModelError> {
    let (n, h, w, c) = x.dim();
    let channels = self.kernel.dim().2;
    if c != channels {
      return Err(ModelError::ChannelMismatch {
        expected: channels,
        actual: c,
      });
    }

    let (oh, top) = Padding::Same.geometry(h, self.size, self.stride);
    let (ow, left) = Padding::Same.geometry(w, self.size, self.stride);
    let mut out = Array4::<f32>::zeros((n, oh, ow, c));

    for b in 0..n {
      for oy in 0..oh {
        for ox in 0..ow {
          let mut acc = out.slice_mut(s![b, oy, ox, ..]);
          for ky in 0..self.size {
            let iy = (oy * self.stride + ky) as isize - top as isize;
            if iy < 0 || iy >= h as isize {
              continue;
            }
            for kx in 0..self.size {
              let ix = (ox * self.stride + kx) as isize - left as isize;
              if ix < 0 || ix >= w as isize {
                continue;
              }
              Zip::from(&mut acc)
                .and(x.slice(s![b, iy as usize, ix as usize, ..]))
                .and(self.kernel.slice(s![ky, kx, ..]))
                .for_each(|a, &p, &k| *a += p * k);
            }
          }
          acc += &*self.bias;
        }
      }
    }

    if let Some(norm) = &self.norm {
      norm.apply(&mut out);
    }
    self.activation.apply(&mut out);
    Ok(x.sibling(out))
  }
}

/// 步长等于窗口的最大池化
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
  pub size: usize,
}

impl MaxPool2d {
  pub fn forward(&self, x: &Tensor<Ix4>) -> Tensor<Ix4> {
    let (n, h, w, c) = x.dim();
    let (oh, ow) = (h / self.size, w / self.size);
    let mut out = Array4::<f32>::from_elem((n, oh, ow, c), f32::NEG_INFINITY);
    for b in 0..n {
      for oy in 0..oh {
        for ox in 0..ow {
          let mut acc = out.slice_mut(s![b, oy, ox, ..]);
          let window = x.slice(s![
            b,
            oy * self.size..(oy + 1) * self.size,
            ox * self.size..(ox + 1) * self.size,
            ..
          ]);
          for row in window.outer_iter() {
            for pixel in row.outer_iter() {
              acc.zip_mut_with(&pixel, |a, v| *a = a.max(*v));
            }
          }
        }
      }
    }
    x.sibling(out)
  }
}

/// 全局平均池化，输出 `(n, c)`
pub fn global_average_pool(x: &Tensor<Ix4>) -> Result<Tensor<Ix2>, ModelError> {
  let (n, h, w, c) = x.dim();
  let pooled = x
    .view()
    .into_shape_with_order((n, h * w, c))?
    .mean_axis(Axis(1))
    .ok_or(ModelError::EmptyFeatureMap)?;
  Ok(x.sibling(pooled))
}

/// 展平为 `(n, h*w*c)`
pub fn flatten(x: &Tensor<Ix4>) -> Result<Tensor<Ix2>, ModelError> {
  let (n, h, w, c) = x.dim();
  let flat = x.view().into_shape_with_order((n, h * w * c))?.to_owned();
  Ok(x.sibling(flat))
}

/// 推理时为恒等映射
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
  pub rate: f32,
}

impl Dropout {
  pub fn forward<D: Dimension>(&self, x: Tensor<D>) -> Tensor<D> {
    x
  }
}

#[derive(Debug)]
pub struct Dense {
  weight: Tensor<Ix2>,
  bias: Tensor<Ix1>,
  activation: Activation,
}

impl Dense {
  pub fn new(init: &mut Initializer, inputs: usize, units: usize, activation: Activation) -> Self {
    let weight = init.glorot((inputs, units), inputs, units);
    Self::from_parts(init, weight, Array1::zeros(units), activation)
  }

  pub fn from_parts(
    init: &Initializer,
    weight: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
  ) -> Self {
    Self {
      weight: init.param(weight),
      bias: init.param(bias),
      activation,
    }
  }

  pub fn units(&self) -> usize {
    self.weight.dim().1
  }

  pub fn forward(&self, x: &Tensor<Ix2>) -> Result<Tensor<Ix2>, ModelError> {
    let inputs = self.weight.dim().0;
    if x.dim().1 != inputs {
      return Err(ModelError::ChannelMismatch {
        expected: inputs,
        actual: x.dim().1,
      });
    }
    let mut out = x.dot(&*self.weight);
    out += &*self.bias;
    self.activation.apply(&mut out);
    Ok(x.sibling(out))
  }
}

/// 通道注意力：全局池化 → 降维 → swish → 升维 → sigmoid → 逐通道相乘
#[derive(Debug)]
pub struct SqueezeExcite {
  reduce: Dense,
  expand: Dense,
}

impl SqueezeExcite {
  pub fn new(init: &mut Initializer, channels: usize, squeezed: usize) -> Self {
    Self {
      reduce: Dense::new(init, channels, squeezed.max(1), Activation::Swish),
      expand: Dense::new(init, squeezed.max(1), channels, Activation::Sigmoid),
    }
  }

  pub fn forward(&self, x: &Tensor<Ix4>) -> Result<Tensor<Ix4>, ModelError> {
    let pooled = global_average_pool(x)?;
    let reduced = self.reduce.forward(&pooled)?;
    let gate = self.expand.forward(&reduced)?;

    let mut out = x.sibling(x.view().to_owned());
    for (mut sample, g) in out.outer_iter_mut().zip(gate.outer_iter()) {
      sample *= &g;
    }
    Ok(out)
  }
}

/// 对 `(1, 2)` 的 logits 做 softmax
pub fn softmax_pair(logits: &Tensor<Ix2>) -> Result<ProbabilityVector, ModelError> {
  let row = logits.row(0);
  if row.len() != 2 {
    return Err(ModelError::ChannelMismatch {
      expected: 2,
      actual: row.len(),
    });
  }
  let max = row[0].max(row[1]);
  let (a, b) = ((row[0] - max).exp(), (row[1] - max).exp());
  ProbabilityVector::normalize(a, b)
}

/// 参数张量的总元素数，用于日志
pub fn parameter_count(ledger: &TensorLedger) -> usize {
  ledger.live_bytes() / std::mem::size_of::<f32>()
}
