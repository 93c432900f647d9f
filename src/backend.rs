// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/backend.rs - 评分后端
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

use std::sync::OnceLock;

use image::DynamicImage;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  adjust::Adjustment,
  lifecycle::{LifecycleError, ServiceState},
  model::{
    CompactCnnBackend, HeuristicBackend, MockBackend, MockConfig, ModelDescriptor, ModelError,
    ProbabilityVector, SeparableCnnBackend,
  },
  preprocess::{PreprocessError, decode},
  report::DetectionStatus,
  tensor::TensorLedger,
};

#[cfg(feature = "remote_delegate")]
use crate::model::{RemoteBackend, RemoteConfig};

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] PreprocessError),
  #[error("后端初始化失败: {0}")]
  Init(String),
  #[error("后端未就绪，当前状态: {0:?}")]
  NotReady(ServiceState),
  #[error("推理失败: {0}")]
  Inference(#[from] ModelError),
  #[error("网络错误: {0}")]
  Network(String),
  #[error("配置错误: {0}")]
  Configuration(String),
}

impl From<LifecycleError> for BackendError {
  fn from(err: LifecycleError) -> Self {
    match err {
      LifecycleError::NotReady(state) => BackendError::NotReady(state),
      LifecycleError::Failed => BackendError::Init(err.to_string()),
      LifecycleError::Disposed => BackendError::NotReady(ServiceState::Disposed),
    }
  }
}

/// 一次分类请求的输入：原始字节，按需解码
#[derive(Debug)]
pub struct Sample<'a> {
  bytes: &'a [u8],
  image: OnceLock<DynamicImage>,
}

impl<'a> Sample<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self {
      bytes,
      image: OnceLock::new(),
    }
  }

  pub fn bytes(&self) -> &[u8] {
    self.bytes
  }

  pub fn image(&self) -> Result<&DynamicImage, PreprocessError> {
    if let Some(image) = self.image.get() {
      return Ok(image);
    }
    let image = decode(self.bytes)?;
    Ok(self.image.get_or_init(|| image))
  }
}

/// 后端直接给出的结论（模拟与远程后端）
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
  pub status: DetectionStatus,
  /// [0, 1]
  pub confidence: f32,
  pub notes: Option<String>,
  pub model_version: Option<String>,
}

/// 后端输出
#[derive(Debug, Clone, PartialEq)]
pub enum Scoring {
  Probabilities {
    raw: ProbabilityVector,
    adjustment: Option<Adjustment>,
  },
  Verdict(Verdict),
}

/// 后端的参数与中间激活账本
#[derive(Debug, Clone, Default)]
pub struct Ledgers {
  pub parameters: TensorLedger,
  pub activations: TensorLedger,
}

/// 所有评分后端共同遵守的约定
#[allow(async_fn_in_trait)]
pub trait ScoringBackend {
  /// 幂等；已就绪时不会重新构造参数
  async fn initialize(&mut self) -> Result<(), BackendError>;

  /// 仅在 Ready 状态可用，调用结束时所有中间张量均已释放
  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError>;

  fn dispose(&mut self);

  fn version(&self) -> ModelDescriptor;

  fn state(&self) -> ServiceState;

  fn is_ready(&self) -> bool {
    self.state() == ServiceState::Ready
  }

  fn ledgers(&self) -> Option<&Ledgers> {
    None
  }
}

#[derive(Error, Debug)]
pub enum BackendConfigError {
  #[error("不支持的后端方案: {0}")]
  SchemeMismatch(String),
  #[error("后端参数错误: {0}")]
  InvalidParameter(String),
}

/// 由配置选出的唯一后端
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
  CompactCnn { seed: u64 },
  SeparableCnn { seed: u64 },
  Heuristic { seed: u64 },
  Mock(MockConfig),
  #[cfg(feature = "remote_delegate")]
  Remote(RemoteConfig),
}

fn seed_param(url: &Url, default: u64) -> Result<u64, BackendConfigError> {
  crate::query_param(url, "seed")
    .transpose()
    .map(|v| v.unwrap_or(default))
    .map_err(BackendConfigError::InvalidParameter)
}

impl FromUrl for BackendConfig {
  type Error = BackendConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let scheme = url.scheme();
    if scheme == CompactCnnBackend::SCHEME {
      return Ok(BackendConfig::CompactCnn {
        seed: seed_param(url, CompactCnnBackend::DEFAULT_SEED)?,
      });
    }
    if scheme == SeparableCnnBackend::SCHEME {
      return Ok(BackendConfig::SeparableCnn {
        seed: seed_param(url, SeparableCnnBackend::DEFAULT_SEED)?,
      });
    }
    if scheme == HeuristicBackend::SCHEME {
      return Ok(BackendConfig::Heuristic {
        seed: seed_param(url, HeuristicBackend::DEFAULT_SEED)?,
      });
    }
    if scheme == <MockConfig as FromUrlWithScheme>::SCHEME {
      return Ok(BackendConfig::Mock(MockConfig::from_url(url)?));
    }
    #[cfg(feature = "remote_delegate")]
    {
      if scheme == <RemoteConfig as FromUrlWithScheme>::SCHEME {
        return Ok(BackendConfig::Remote(RemoteConfig::from_url(url)?));
      }
    }
    Err(BackendConfigError::SchemeMismatch(scheme.to_string()))
  }
}

/// 封闭的后端集合
pub enum Backend {
  CompactCnn(CompactCnnBackend),
  SeparableCnn(SeparableCnnBackend),
  Heuristic(HeuristicBackend),
  Mock(MockBackend),
  #[cfg(feature = "remote_delegate")]
  Remote(RemoteBackend),
}

impl From<BackendConfig> for Backend {
  fn from(config: BackendConfig) -> Self {
    match config {
      BackendConfig::CompactCnn { seed } => Backend::CompactCnn(CompactCnnBackend::new(seed)),
      BackendConfig::SeparableCnn { seed } => Backend::SeparableCnn(SeparableCnnBackend::new(seed)),
      BackendConfig::Heuristic { seed } => Backend::Heuristic(HeuristicBackend::with_seed(seed)),
      BackendConfig::Mock(config) => Backend::Mock(MockBackend::new(config)),
      #[cfg(feature = "remote_delegate")]
      BackendConfig::Remote(config) => Backend::Remote(RemoteBackend::new(config)),
    }
  }
}

impl FromUrl for Backend {
  type Error = BackendConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(BackendConfig::from_url(url)?.into())
  }
}

macro_rules! dispatch {
  ($self:expr, $inner:ident => $body:expr) => {
    match $self {
      Backend::CompactCnn($inner) => $body,
      Backend::SeparableCnn($inner) => $body,
      Backend::Heuristic($inner) => $body,
      Backend::Mock($inner) => $body,
      #[cfg(feature = "remote_delegate")]
      Backend::Remote($inner) => $body,
    }
  };
}

impl ScoringBackend for Backend {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    dispatch!(self, b => b.initialize().await)
  }

  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError> {
    dispatch!(self, b => b.classify(sample).await)
  }

  fn dispose(&mut self) {
    dispatch!(self, b => b.dispose())
  }

  fn version(&self) -> ModelDescriptor {
    dispatch!(self, b => b.version())
  }

  fn state(&self) -> ServiceState {
    dispatch!(self, b => b.state())
  }

  fn ledgers(&self) -> Option<&Ledgers> {
    dispatch!(self, b => b.ledgers())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(s: &str) -> Result<BackendConfig, BackendConfigError> {
    BackendConfig::from_url(&Url::parse(s).unwrap())
  }

  #[test]
  fn schemes_select_backends() {
    assert!(matches!(parse("compact-cnn:"), Ok(BackendConfig::CompactCnn { .. })));
    assert_eq!(
      parse("separable-cnn:?seed=9").unwrap(),
      BackendConfig::SeparableCnn { seed: 9 }
    );
    assert!(matches!(parse("heuristic:"), Ok(BackendConfig::Heuristic { .. })));
    assert!(matches!(parse("mock:?min_delay_ms=0&max_delay_ms=0"), Ok(BackendConfig::Mock(_))));
    assert!(matches!(parse("yolo26:///model.rknn"), Err(BackendConfigError::SchemeMismatch(_))));
    assert!(matches!(parse("compact-cnn:?seed=abc"), Err(BackendConfigError::InvalidParameter(_))));
  }

  #[cfg(feature = "remote_delegate")]
  #[test]
  fn remote_scheme_parses_endpoint() {
    match parse("remote:?endpoint=https%3A%2F%2Fscan.example%2Fv1%2Fdetect&token=abc").unwrap() {
      BackendConfig::Remote(config) => {
        assert_eq!(config.endpoint.as_deref(), Some("https://scan.example/v1/detect"));
        assert_eq!(config.token.as_deref(), Some("abc"));
      }
      other => panic!("unexpected config: {other:?}"),
    }
  }

  #[test]
  fn sample_decodes_lazily() {
    let sample = Sample::new(b"not an image");
    assert_eq!(sample.bytes(), b"not an image");
    assert!(sample.image().is_err());
  }
}
