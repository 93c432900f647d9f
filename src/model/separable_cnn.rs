// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/separable_cnn.rs - 深度可分离卷积网络
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

use ndarray::Ix4;
use tracing::{debug, info};

use crate::{
  backend::{BackendError, Ledgers, Sample, Scoring, ScoringBackend},
  frame::{ImageTensor, PixelRange, RGB_CHANNELS},
  lifecycle::{Lifecycle, ServiceState},
  model::{
    ArchitectureKind, Model, ModelDescriptor, ModelError, ProbabilityVector,
    layers::{
      self, Activation, Conv2d, Dense, DepthwiseConv2d, Dropout, Initializer, LayerNorm, Padding,
      SqueezeExcite,
    },
  },
  preprocess::{ChannelLayout, Preprocessor, Resampling},
  tensor::Tensor,
};

const SEPARABLE_CNN_VERSION: &str = "separable-cnn-b0-v1.0";
const STEM_FILTERS: usize = 32;
const STEM_KERNEL: usize = 3;
const STEM_STRIDE: usize = 2;
const SQUEEZE_RATIO: f32 = 0.25;
const HEAD_DROPOUT: f32 = 0.2;

/// 单个倒残差块的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparableBlockConfig {
  pub width: usize,
  pub kernel: usize,
  pub stride: usize,
  pub expansion: usize,
}

const fn block(width: usize, kernel: usize, stride: usize, expansion: usize) -> SeparableBlockConfig {
  SeparableBlockConfig {
    width,
    kernel,
    stride,
    expansion,
  }
}

/// 16 个块的宽度、卷积核、步长与扩张倍数
pub const SEPARABLE_BLOCKS: [SeparableBlockConfig; 16] = [
  block(16, 3, 1, 1),
  block(24, 3, 2, 6),
  block(24, 3, 1, 6),
  block(40, 5, 2, 6),
  block(40, 5, 1, 6),
  block(80, 3, 2, 6),
  block(80, 3, 1, 6),
  block(80, 3, 1, 6),
  block(112, 5, 1, 6),
  block(112, 5, 1, 6),
  block(112, 5, 1, 6),
  block(192, 5, 2, 6),
  block(192, 5, 1, 6),
  block(192, 5, 1, 6),
  block(192, 5, 1, 6),
  block(320, 3, 1, 6),
];

/// 扩张 → 逐通道卷积 → 通道注意力 → 投影，步长为 1 且通道一致时加残差
#[derive(Debug)]
struct InvertedResidual {
  expand: Option<Conv2d>,
  depthwise: DepthwiseConv2d,
  squeeze: SqueezeExcite,
  project: Conv2d,
  residual: bool,
}

impl InvertedResidual {
  fn new(init: &mut Initializer, in_channels: usize, config: &SeparableBlockConfig) -> Self {
    let expanded = in_channels * config.expansion;
    let norm = LayerNorm::default();
    let expand = (config.expansion != 1)
      .then(|| Conv2d::pointwise(init, in_channels, expanded, Activation::Swish).with_norm(norm));
    let depthwise =
      DepthwiseConv2d::new(init, expanded, config.kernel, config.stride, Activation::Swish).with_norm(norm);
    let squeezed = (((in_channels as f32) * SQUEEZE_RATIO) as usize).max(1);
    let squeeze = SqueezeExcite::new(init, expanded, squeezed);
    let project = Conv2d::pointwise(init, expanded, config.width, Activation::Linear).with_norm(norm);

    Self {
      expand,
      depthwise,
      squeeze,
      project,
      residual: config.stride == 1 && in_channels == config.width,
    }
  }

  fn forward(&self, x: &Tensor<Ix4>) -> Result<Tensor<Ix4>, ModelError> {
    let filtered = match &self.expand {
      Some(expand) => self.depthwise.forward(&expand.forward(x)?)?,
      None => self.depthwise.forward(x)?,
    };
    let gated = self.squeeze.forward(&filtered)?;
    drop(filtered);
    let mut out = self.project.forward(&gated)?;
    if self.residual {
      *out += &**x;
    }
    Ok(out)
  }
}

/// 主干：stem 卷积加 16 个倒残差块，输出最后一层特征图
///
/// 每个卷积之后、激活之前做层归一化。
#[derive(Debug)]
pub struct SeparableTrunk {
  stem: Conv2d,
  blocks: Vec<InvertedResidual>,
}

impl SeparableTrunk {
  pub fn build(init: &mut Initializer) -> Self {
    let stem = Conv2d::new(
      init,
      RGB_CHANNELS,
      STEM_FILTERS,
      STEM_KERNEL,
      STEM_STRIDE,
      Padding::Same,
      Activation::Swish,
    )
    .with_norm(LayerNorm::default());

    let mut channels = stem.out_channels();
    let blocks = SEPARABLE_BLOCKS
      .iter()
      .map(|config| {
        let block = InvertedResidual::new(init, channels, config);
        channels = config.width;
        block
      })
      .collect();

    Self { stem, blocks }
  }

  pub fn out_channels(&self) -> usize {
    SEPARABLE_BLOCKS[SEPARABLE_BLOCKS.len() - 1].width
  }

  pub fn forward(&self, input: &ImageTensor) -> Result<Tensor<Ix4>, ModelError> {
    let mut x = self.stem.forward(input.tensor())?;
    for (idx, block) in self.blocks.iter().enumerate() {
      x = block.forward(&x)?;
      debug!("块 {} 输出形状: {:?}", idx + 1, x.dim());
    }
    Ok(x)
  }

  /// 全局平均池化后的特征向量 `(1, 320)`
  pub fn embed(&self, input: &ImageTensor) -> Result<Tensor<ndarray::Ix2>, ModelError> {
    let features = self.forward(input)?;
    layers::global_average_pool(&features)
  }
}

/// 主干 → 全局池化 → dropout → 两类 softmax
#[derive(Debug)]
pub struct SeparableCnn {
  trunk: SeparableTrunk,
  dropout: Dropout,
  head: Dense,
}

impl SeparableCnn {
  pub fn build(init: &mut Initializer) -> Self {
    let trunk = SeparableTrunk::build(init);
    let head = Dense::new(init, trunk.out_channels(), 2, Activation::Linear);
    Self {
      trunk,
      dropout: Dropout { rate: HEAD_DROPOUT },
      head,
    }
  }
}

impl Model for SeparableCnn {
  type Input = ImageTensor;
  type Output = ProbabilityVector;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let pooled = self.dropout.forward(self.trunk.embed(input)?);
    let logits = self.head.forward(&pooled)?;
    layers::softmax_pair(&logits)
  }
}

/// 深度可分离卷积网络后端
pub struct SeparableCnnBackend {
  seed: u64,
  lifecycle: Lifecycle,
  network: Option<SeparableCnn>,
  ledgers: Ledgers,
}

impl SeparableCnnBackend {
  pub const SCHEME: &'static str = "separable-cnn";
  pub const DEFAULT_SEED: u64 = 0x5EED_0002;
  pub const PREPROCESSOR: Preprocessor =
    Preprocessor::new(Resampling::Bilinear, ChannelLayout::Rgb, PixelRange::Byte);

  pub fn new(seed: u64) -> Self {
    Self {
      seed,
      lifecycle: Lifecycle::new(),
      network: None,
      ledgers: Ledgers::default(),
    }
  }
}

impl Default for SeparableCnnBackend {
  fn default() -> Self {
    Self::new(Self::DEFAULT_SEED)
  }
}

impl ScoringBackend for SeparableCnnBackend {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    if !self.lifecycle.begin_initialize()? {
      return Ok(());
    }

    info!("构造深度可分离卷积网络 (种子: {:#x})", self.seed);
    let mut init = Initializer::new(self.seed, &self.ledgers.parameters);
    self.network = Some(SeparableCnn::build(&mut init));
    self.lifecycle.finish_initialize(true);
    info!(
      "深度可分离卷积网络就绪，参数量: {}",
      layers::parameter_count(&self.ledgers.parameters)
    );
    Ok(())
  }

  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError> {
    self.lifecycle.ensure_ready()?;
    let network = self
      .network
      .as_ref()
      .ok_or(BackendError::NotReady(self.lifecycle.state()))?;

    let tensor = Self::PREPROCESSOR.preprocess_image(sample.image()?, &self.ledgers.activations)?;
    let raw = network.infer(&tensor)?;
    debug!("深度可分离卷积网络输出: {:?}", raw);
    Ok(Scoring::Probabilities {
      raw,
      adjustment: None,
    })
  }

  fn dispose(&mut self) {
    self.network = None;
    let previous = self.lifecycle.dispose();
    debug!("释放深度可分离卷积网络 (之前状态: {:?})", previous);
  }

  fn version(&self) -> ModelDescriptor {
    ModelDescriptor {
      version: SEPARABLE_CNN_VERSION.to_string(),
      architecture: ArchitectureKind::DeepSeparableCnn,
      diagnostic: true,
    }
  }

  fn state(&self) -> ServiceState {
    self.lifecycle.state()
  }

  fn ledgers(&self) -> Option<&Ledgers> {
    Some(&self.ledgers)
  }
}
