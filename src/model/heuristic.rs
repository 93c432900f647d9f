// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/heuristic.rs - 特征提取 + 启发式修正
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

//! 通用特征提取器加一个小分类头，输出再经过像素统计修正。
//!
//! 分类头没有经过训练，结果只能作为演示，报告中会注明非诊断用途。

use ndarray::{Array1, Ix2};
use tracing::{debug, error, info};

use crate::{
  adjust::adjust,
  backend::{BackendError, Ledgers, Sample, Scoring, ScoringBackend},
  frame::{ImageTensor, PixelRange},
  lifecycle::{Lifecycle, ServiceState},
  model::{
    ArchitectureKind, ModelDescriptor, ModelError, ProbabilityVector,
    layers::{self, Activation, Dense, Dropout, Initializer},
    separable_cnn::SeparableTrunk,
  },
  preprocess::{ChannelLayout, Preprocessor, Resampling},
  stats::PixelStatistics,
  tensor::{Tensor, TensorLedger},
};

const HEURISTIC_VERSION: &str = "heuristic-baseline-v1.0";
const HEAD_HIDDEN: [usize; 2] = [128, 64];
const HEAD_DROPOUT: [f32; 2] = [0.3, 0.2];
const HEAD_KERNEL_OFFSET: f32 = 0.05;
const HEAD_BIAS: f32 = 0.01;
const EXTRACTOR_SEED_OFFSET: u64 = 0x00E7_7AC7;

/// 把图像张量映射为定长特征向量
pub trait FeatureExtractor {
  /// 构造或加载参数，参数登记在给定账本上
  fn load(&mut self, parameters: &TensorLedger) -> Result<(), BackendError>;

  fn embedding_len(&self) -> usize;

  /// 输出 `(1, embedding_len)`
  fn embed(&self, input: &ImageTensor) -> Result<Tensor<Ix2>, BackendError>;

  fn unload(&mut self);
}

/// 复用深度可分离网络的主干，取全局池化后的特征
#[derive(Debug)]
pub struct SeparableTrunkExtractor {
  seed: u64,
  trunk: Option<SeparableTrunk>,
}

impl SeparableTrunkExtractor {
  pub fn new(seed: u64) -> Self {
    Self { seed, trunk: None }
  }
}

impl FeatureExtractor for SeparableTrunkExtractor {
  fn load(&mut self, parameters: &TensorLedger) -> Result<(), BackendError> {
    if self.trunk.is_none() {
      let mut init = Initializer::new(self.seed, parameters);
      self.trunk = Some(SeparableTrunk::build(&mut init));
    }
    Ok(())
  }

  fn embedding_len(&self) -> usize {
    self.trunk.as_ref().map(|t| t.out_channels()).unwrap_or(0)
  }

  fn embed(&self, input: &ImageTensor) -> Result<Tensor<Ix2>, BackendError> {
    let trunk = self
      .trunk
      .as_ref()
      .ok_or(BackendError::NotReady(ServiceState::Uninitialized))?;
    Ok(trunk.embed(input)?)
  }

  fn unload(&mut self) {
    self.trunk = None;
  }
}

/// embedding → 128 relu → 64 relu → 2 softmax
#[derive(Debug)]
pub struct HeuristicHead {
  layers: Vec<(Dense, Dropout)>,
  output: Dense,
}

impl HeuristicHead {
  pub fn build(init: &mut Initializer, embedding_len: usize) -> Self {
    let mut inputs = embedding_len;
    let mut layers = Vec::with_capacity(HEAD_HIDDEN.len());
    for (idx, (units, rate)) in HEAD_HIDDEN.into_iter().zip(HEAD_DROPOUT).enumerate() {
      let offset = if idx == 0 { 0.0 } else { HEAD_KERNEL_OFFSET };
      layers.push((
        Self::dense(init, inputs, units, offset, Activation::Relu),
        Dropout { rate },
      ));
      inputs = units;
    }
    let output = Self::dense(init, inputs, 2, HEAD_KERNEL_OFFSET, Activation::Linear);
    Self { layers, output }
  }

  fn dense(init: &mut Initializer, inputs: usize, units: usize, offset: f32, activation: Activation) -> Dense {
    let weight = init.glorot((inputs, units), inputs, units) + offset;
    Dense::from_parts(init, weight, Array1::from_elem(units, HEAD_BIAS), activation)
  }

  pub fn forward(&self, embedding: &Tensor<Ix2>) -> Result<ProbabilityVector, ModelError> {
    let mut x = embedding.sibling(embedding.view().to_owned());
    for (dense, dropout) in &self.layers {
      x = dropout.forward(dense.forward(&x)?);
    }
    let logits = self.output.forward(&x)?;
    layers::softmax_pair(&logits)
  }
}

/// 特征提取 + 启发式修正后端
pub struct HeuristicBackend<E: FeatureExtractor = SeparableTrunkExtractor> {
  extractor: E,
  seed: u64,
  lifecycle: Lifecycle,
  head: Option<HeuristicHead>,
  ledgers: Ledgers,
}

impl HeuristicBackend {
  pub const SCHEME: &'static str = "heuristic";
  pub const DEFAULT_SEED: u64 = 0x5EED_0003;

  pub fn with_seed(seed: u64) -> Self {
    Self::new(
      SeparableTrunkExtractor::new(seed.wrapping_add(EXTRACTOR_SEED_OFFSET)),
      seed,
    )
  }
}

impl Default for HeuristicBackend {
  fn default() -> Self {
    Self::with_seed(Self::DEFAULT_SEED)
  }
}

impl<E: FeatureExtractor> HeuristicBackend<E> {
  pub const PREPROCESSOR: Preprocessor = Preprocessor::new(
    Resampling::Bilinear,
    ChannelLayout::LuminanceReplicated,
    PixelRange::Unit,
  );

  pub fn new(extractor: E, seed: u64) -> Self {
    Self {
      extractor,
      seed,
      lifecycle: Lifecycle::new(),
      head: None,
      ledgers: Ledgers::default(),
    }
  }
}

impl<E: FeatureExtractor> ScoringBackend for HeuristicBackend<E> {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    if !self.lifecycle.begin_initialize()? {
      return Ok(());
    }

    info!("加载特征提取器");
    if let Err(err) = self.extractor.load(&self.ledgers.parameters) {
      error!("特征提取器加载失败: {}", err);
      self.extractor.unload();
      self.lifecycle.finish_initialize(false);
      return Err(err);
    }

    let mut init = Initializer::new(self.seed, &self.ledgers.parameters);
    self.head = Some(HeuristicHead::build(&mut init, self.extractor.embedding_len()));
    self.lifecycle.finish_initialize(true);
    info!(
      "启发式后端就绪，特征维度: {}，参数量: {}",
      self.extractor.embedding_len(),
      layers::parameter_count(&self.ledgers.parameters)
    );
    Ok(())
  }

  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError> {
    self.lifecycle.ensure_ready()?;
    let head = self
      .head
      .as_ref()
      .ok_or(BackendError::NotReady(self.lifecycle.state()))?;

    let image = sample.image()?;
    let stats = PixelStatistics::analyze(image);
    let embedding = {
      let tensor = Self::PREPROCESSOR.preprocess_image(image, &self.ledgers.activations)?;
      self.extractor.embed(&tensor)?
    };
    let raw = head.forward(&embedding)?;
    drop(embedding);

    let adjustment = adjust(raw, stats)?;
    debug!("启发式后端: 原始 {:?}, 修正后 {:?}", raw, adjustment.adjusted);
    Ok(Scoring::Probabilities {
      raw,
      adjustment: Some(adjustment),
    })
  }

  fn dispose(&mut self) {
    self.head = None;
    self.extractor.unload();
    let previous = self.lifecycle.dispose();
    debug!("释放启发式后端 (之前状态: {:?})", previous);
  }

  fn version(&self) -> ModelDescriptor {
    ModelDescriptor {
      version: HEURISTIC_VERSION.to_string(),
      architecture: ArchitectureKind::FeatureExtractorHeuristic,
      diagnostic: false,
    }
  }

  fn state(&self) -> ServiceState {
    self.lifecycle.state()
  }

  fn ledgers(&self) -> Option<&Ledgers> {
    Some(&self.ledgers)
  }
}
