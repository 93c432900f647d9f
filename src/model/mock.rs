// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/mock.rs - 模拟后端
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

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  backend::{BackendConfigError, BackendError, Sample, Scoring, ScoringBackend, Verdict},
  lifecycle::{Lifecycle, ServiceState},
  model::{ArchitectureKind, ModelDescriptor},
  report::DetectionStatus,
};

const MOCK_VERSION: &str = "mock-v1.0";

const POSITIVE_RATE: f64 = 0.30;
const NEGATIVE_RATE: f64 = 0.55;

const POSITIVE_NOTES: &str =
  "Simulated finding: patchy opacity in the lower lobes. Not derived from the image.";
const NEGATIVE_NOTES: &str = "Simulated finding: no focal consolidation. Not derived from the image.";
const INCONCLUSIVE_NOTES: &str =
  "Simulated finding: image quality insufficient for a confident read. Not derived from the image.";

/// `mock:?min_delay_ms=2000&max_delay_ms=4000&seed=7`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
  pub min_delay_ms: u64,
  pub max_delay_ms: u64,
  /// 未指定时使用系统熵
  pub seed: Option<u64>,
}

impl Default for MockConfig {
  fn default() -> Self {
    Self {
      min_delay_ms: 2000,
      max_delay_ms: 4000,
      seed: None,
    }
  }
}

impl MockConfig {
  /// 无延迟，测试用
  pub fn instant(seed: u64) -> Self {
    Self {
      min_delay_ms: 0,
      max_delay_ms: 0,
      seed: Some(seed),
    }
  }
}

impl FromUrlWithScheme for MockConfig {
  const SCHEME: &'static str = "mock";
}

impl FromUrl for MockConfig {
  type Error = BackendConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(BackendConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let defaults = Self::default();
    let param = |key: &str, default: u64| {
      crate::query_param::<u64>(url, key)
        .transpose()
        .map(|v| v.unwrap_or(default))
        .map_err(BackendConfigError::InvalidParameter)
    };
    let min_delay_ms = param("min_delay_ms", defaults.min_delay_ms)?;
    let max_delay_ms = param("max_delay_ms", defaults.max_delay_ms.max(min_delay_ms))?;
    if max_delay_ms < min_delay_ms {
      return Err(BackendConfigError::InvalidParameter(format!(
        "max_delay_ms ({}) 小于 min_delay_ms ({})",
        max_delay_ms, min_delay_ms
      )));
    }
    let seed = crate::query_param::<u64>(url, "seed")
      .transpose()
      .map_err(BackendConfigError::InvalidParameter)?;

    Ok(Self {
      min_delay_ms,
      max_delay_ms,
      seed,
    })
  }
}

/// 按固定比例随机给出结论的后端，不读取图像内容
pub struct MockBackend {
  config: MockConfig,
  rng: StdRng,
  lifecycle: Lifecycle,
}

impl MockBackend {
  pub fn new(config: MockConfig) -> Self {
    let rng = match config.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_os_rng(),
    };
    Self {
      config,
      rng,
      lifecycle: Lifecycle::new(),
    }
  }

  /// 抽取一次结论：30% 阳性，55% 阴性，15% 不确定
  pub fn draw<R: Rng>(rng: &mut R) -> Verdict {
    let r: f64 = rng.random();
    let spread: f32 = rng.random();
    let (status, confidence, notes) = if r < POSITIVE_RATE {
      (DetectionStatus::Pneumonia, 65.0 + spread * 30.0, POSITIVE_NOTES)
    } else if r < POSITIVE_RATE + NEGATIVE_RATE {
      (DetectionStatus::Normal, 70.0 + spread * 25.0, NEGATIVE_NOTES)
    } else {
      (DetectionStatus::Inconclusive, 45.0 + spread * 20.0, INCONCLUSIVE_NOTES)
    };

    Verdict {
      status,
      confidence: confidence / 100.0,
      notes: Some(notes.to_string()),
      model_version: None,
    }
  }

  fn latency(&mut self) -> Duration {
    let MockConfig {
      min_delay_ms,
      max_delay_ms,
      ..
    } = self.config;
    let ms = if max_delay_ms > min_delay_ms {
      self.rng.random_range(min_delay_ms..max_delay_ms)
    } else {
      min_delay_ms
    };
    Duration::from_millis(ms)
  }
}

impl ScoringBackend for MockBackend {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    if self.lifecycle.begin_initialize()? {
      info!(
        "模拟后端就绪，延迟 {}-{} ms",
        self.config.min_delay_ms, self.config.max_delay_ms
      );
      self.lifecycle.finish_initialize(true);
    }
    Ok(())
  }

  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError> {
    self.lifecycle.ensure_ready()?;

    let latency = self.latency();
    debug!("模拟处理 {} 字节，等待 {:?}", sample.bytes().len(), latency);
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
    Ok(Scoring::Verdict(Self::draw(&mut self.rng)))
  }

  fn dispose(&mut self) {
    let previous = self.lifecycle.dispose();
    debug!("释放模拟后端 (之前状态: {:?})", previous);
  }

  fn version(&self) -> ModelDescriptor {
    ModelDescriptor {
      version: MOCK_VERSION.to_string(),
      architecture: ArchitectureKind::MockGenerator,
      diagnostic: false,
    }
  }

  fn state(&self) -> ServiceState {
    self.lifecycle.state()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_defaults_and_overrides() {
    let config = MockConfig::from_url(&Url::parse("mock:").unwrap()).unwrap();
    assert_eq!(config, MockConfig::default());

    let config = MockConfig::from_url(&Url::parse("mock:?min_delay_ms=5&max_delay_ms=9&seed=3").unwrap()).unwrap();
    assert_eq!(
      config,
      MockConfig {
        min_delay_ms: 5,
        max_delay_ms: 9,
        seed: Some(3)
      }
    );

    assert!(matches!(
      MockConfig::from_url(&Url::parse("mock:?min_delay_ms=10&max_delay_ms=1").unwrap()),
      Err(BackendConfigError::InvalidParameter(_))
    ));
    assert!(matches!(
      MockConfig::from_url(&Url::parse("heuristic:").unwrap()),
      Err(BackendConfigError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn confidences_stay_inside_their_bands() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..2_000 {
      let verdict = MockBackend::draw(&mut rng);
      let band = match verdict.status {
        DetectionStatus::Pneumonia => 0.65..=0.95,
        DetectionStatus::Normal => 0.70..=0.95,
        DetectionStatus::Inconclusive => 0.45..=0.65,
      };
      assert!(band.contains(&verdict.confidence), "{verdict:?}");
      assert!(verdict.notes.is_some());
    }
  }

  #[tokio::test]
  async fn seeded_backends_repeat_themselves() {
    let mut a = MockBackend::new(MockConfig::instant(42));
    let mut b = MockBackend::new(MockConfig::instant(42));
    a.initialize().await.unwrap();
    b.initialize().await.unwrap();
    let sample = Sample::new(b"ignored");
    for _ in 0..10 {
      assert_eq!(
        a.classify(&sample).await.unwrap(),
        b.classify(&sample).await.unwrap()
      );
    }
  }
}
