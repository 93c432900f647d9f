// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/compact_cnn.rs - 紧凑卷积网络
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

use tracing::{debug, info};

use crate::{
  backend::{BackendError, Ledgers, Sample, Scoring, ScoringBackend},
  frame::{ImageTensor, INPUT_SIZE, PixelRange, RGB_CHANNELS},
  lifecycle::{Lifecycle, ServiceState},
  model::{
    ArchitectureKind, Model, ModelDescriptor, ModelError, ProbabilityVector,
    layers::{self, Activation, Conv2d, Dense, Dropout, Initializer, MaxPool2d, Padding},
  },
  preprocess::{ChannelLayout, Preprocessor, Resampling},
};

const COMPACT_CNN_VERSION: &str = "compact-cnn-v1.0";
const COMPACT_CNN_FILTERS: [usize; 3] = [32, 64, 128];
const COMPACT_CNN_KERNEL: usize = 3;
const COMPACT_CNN_POOL: usize = 2;
const COMPACT_CNN_HIDDEN: usize = 128;

/// conv → relu → maxpool 重复三次，展平后接两层全连接
#[derive(Debug)]
pub struct CompactCnn {
  convs: Vec<Conv2d>,
  pool: MaxPool2d,
  dropout_flat: Dropout,
  hidden: Dense,
  dropout_hidden: Dropout,
  output: Dense,
}

impl CompactCnn {
  pub fn build(init: &mut Initializer) -> Self {
    let mut convs = Vec::with_capacity(COMPACT_CNN_FILTERS.len());
    let mut channels = RGB_CHANNELS;
    let mut side = INPUT_SIZE;
    for filters in COMPACT_CNN_FILTERS {
      convs.push(Conv2d::new(
        init,
        channels,
        filters,
        COMPACT_CNN_KERNEL,
        1,
        Padding::Valid,
        Activation::Relu,
      ));
      channels = filters;
      side = (side - COMPACT_CNN_KERNEL + 1) / COMPACT_CNN_POOL;
    }

    let flat = side * side * channels;
    debug!("紧凑网络展平维度: {}x{}x{} = {}", side, side, channels, flat);

    Self {
      convs,
      pool: MaxPool2d {
        size: COMPACT_CNN_POOL,
      },
      dropout_flat: Dropout { rate: 0.5 },
      hidden: Dense::new(init, flat, COMPACT_CNN_HIDDEN, Activation::Relu),
      dropout_hidden: Dropout { rate: 0.3 },
      output: Dense::new(init, COMPACT_CNN_HIDDEN, 2, Activation::Linear),
    }
  }
}

impl Model for CompactCnn {
  type Input = ImageTensor;
  type Output = ProbabilityVector;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let mut x = self.pool.forward(&self.convs[0].forward(input.tensor())?);
    for conv in &self.convs[1..] {
      x = self.pool.forward(&conv.forward(&x)?);
    }
    let flat = self.dropout_flat.forward(layers::flatten(&x)?);
    drop(x);
    let hidden = self.dropout_hidden.forward(self.hidden.forward(&flat)?);
    let logits = self.output.forward(&hidden)?;
    layers::softmax_pair(&logits)
  }
}

/// 紧凑卷积网络后端
pub struct CompactCnnBackend {
  seed: u64,
  lifecycle: Lifecycle,
  network: Option<CompactCnn>,
  ledgers: Ledgers,
}

impl CompactCnnBackend {
  pub const SCHEME: &'static str = "compact-cnn";
  pub const DEFAULT_SEED: u64 = 0x5EED_0001;
  pub const PREPROCESSOR: Preprocessor =
    Preprocessor::new(Resampling::Nearest, ChannelLayout::Rgb, PixelRange::Unit);

  pub fn new(seed: u64) -> Self {
    Self {
      seed,
      lifecycle: Lifecycle::new(),
      network: None,
      ledgers: Ledgers::default(),
    }
  }
}

impl Default for CompactCnnBackend {
  fn default() -> Self {
    Self::new(Self::DEFAULT_SEED)
  }
}

impl ScoringBackend for CompactCnnBackend {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    if !self.lifecycle.begin_initialize()? {
      return Ok(());
    }

    info!("构造紧凑卷积网络 (种子: {:#x})", self.seed);
    let mut init = Initializer::new(self.seed, &self.ledgers.parameters);
    self.network = Some(CompactCnn::build(&mut init));
    self.lifecycle.finish_initialize(true);
    info!(
      "紧凑卷积网络就绪，参数量: {}",
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
    debug!("紧凑卷积网络输出: {:?}", raw);
    Ok(Scoring::Probabilities {
      raw,
      adjustment: None,
    })
  }

  fn dispose(&mut self) {
    self.network = None;
    let previous = self.lifecycle.dispose();
    debug!("释放紧凑卷积网络 (之前状态: {:?})", previous);
  }

  fn version(&self) -> ModelDescriptor {
    ModelDescriptor {
      version: COMPACT_CNN_VERSION.to_string(),
      architecture: ArchitectureKind::CompactCnn,
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
