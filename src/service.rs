// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/service.rs - 检测服务
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

//! 对外的检测入口：检查输入、调用唯一的后端、整理结果。
//!
//! 初始化、分类与释放经由同一把异步锁串行执行；状态另存一份，
//! 未就绪时无需等锁即可拒绝请求。

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
  backend::{Backend, BackendConfig, BackendError, Ledgers, Sample, Scoring, ScoringBackend},
  intake::{ImageKind, IntakeError, IntakePolicy},
  lifecycle::ServiceState,
  model::ModelDescriptor,
  report::{DetectionReport, synthesize},
};

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("输入检查失败: {0}")]
  Intake(#[from] IntakeError),
  #[error(transparent)]
  Backend(#[from] BackendError),
}

impl ServiceError {
  pub fn is_not_ready(&self) -> bool {
    matches!(self, ServiceError::Backend(BackendError::NotReady(_)))
  }
}

/// 结果连同后端的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedReport {
  pub report: DetectionReport,
  pub scoring: Scoring,
  pub kind: ImageKind,
}

pub struct DetectionService {
  backend: AsyncMutex<Backend>,
  state: Mutex<ServiceState>,
  descriptor: ModelDescriptor,
  policy: IntakePolicy,
}

impl DetectionService {
  pub fn new(config: BackendConfig) -> Self {
    Self::with_backend(config.into())
  }

  pub fn with_backend(backend: Backend) -> Self {
    Self {
      descriptor: backend.version(),
      state: Mutex::new(backend.state()),
      backend: AsyncMutex::new(backend),
      policy: IntakePolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: IntakePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn state(&self) -> ServiceState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_ready(&self) -> bool {
    self.state() == ServiceState::Ready
  }

  pub fn version(&self) -> ModelDescriptor {
    self.descriptor.clone()
  }

  fn record_state(&self, backend: &Backend) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = backend.state();
  }

  pub async fn initialize(&self) -> Result<(), ServiceError> {
    let mut backend = self.backend.lock().await;
    {
      *self.state.lock().unwrap_or_else(PoisonError::into_inner) = match backend.state() {
        ServiceState::Uninitialized => ServiceState::Initializing,
        other => other,
      };
    }
    let result = backend.initialize().await;
    self.record_state(&backend);
    match &result {
      Ok(()) => info!("检测服务就绪: {}", self.descriptor.version),
      Err(e) => warn!("检测服务初始化失败: {}", e),
    }
    result.map_err(ServiceError::from)
  }

  pub async fn classify(&self, bytes: &[u8]) -> Result<DetectionReport, ServiceError> {
    Ok(self.classify_detailed(bytes).await?.report)
  }

  pub async fn classify_detailed(&self, bytes: &[u8]) -> Result<DetailedReport, ServiceError> {
    let start = Instant::now();
    let state = self.state();
    if state != ServiceState::Ready {
      return Err(BackendError::NotReady(state).into());
    }

    let kind = self.policy.validate(bytes)?;
    debug!("输入检查通过: {:?}, {} 字节", kind, bytes.len());

    let scoring = {
      let mut backend = self.backend.lock().await;
      let sample = Sample::new(bytes);
      backend.classify(&sample).await?
    };

    let report = synthesize(&scoring, start.elapsed(), &self.descriptor);
    info!(
      "检测完成: {:?} ({:.4})，耗时 {} ms",
      report.status, report.confidence, report.processing_time_ms
    );
    Ok(DetailedReport {
      report,
      scoring,
      kind,
    })
  }

  pub async fn dispose(&self) {
    let mut backend = self.backend.lock().await;
    backend.dispose();
    self.record_state(&backend);
    info!("检测服务已释放");
  }

  /// 张量账本的句柄，供资源检查使用
  pub async fn ledgers(&self) -> Option<Ledgers> {
    self.backend.lock().await.ledgers().cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::MockConfig;

  const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

  #[tokio::test]
  async fn requests_before_initialize_are_rejected() {
    let service = DetectionService::new(BackendConfig::Mock(MockConfig::instant(1)));
    assert_eq!(service.state(), ServiceState::Uninitialized);
    let err = service.classify(PNG_HEADER).await.unwrap_err();
    assert!(err.is_not_ready());
  }

  #[tokio::test]
  async fn intake_runs_before_the_backend() {
    let service = DetectionService::new(BackendConfig::Mock(MockConfig::instant(1)));
    service.initialize().await.unwrap();
    assert!(service.is_ready());
    assert!(matches!(
      service.classify(b"GIF89a").await,
      Err(ServiceError::Intake(_))
    ));
  }

  #[tokio::test]
  async fn dispose_waits_for_the_classification_in_flight() {
    let service = DetectionService::new(BackendConfig::Mock(MockConfig {
      min_delay_ms: 20,
      max_delay_ms: 40,
      seed: Some(5),
    }));
    service.initialize().await.unwrap();

    // 第一个请求持有锁时，释放与第二个请求依次排队
    let (first, (), second) = tokio::join!(
      service.classify(PNG_HEADER),
      service.dispose(),
      service.classify(PNG_HEADER),
    );
    assert!(first.is_ok(), "{first:?}");
    assert!(matches!(
      second,
      Err(ServiceError::Backend(BackendError::NotReady(ServiceState::Disposed)))
    ));
    assert_eq!(service.state(), ServiceState::Disposed);
    assert!(service.classify(PNG_HEADER).await.unwrap_err().is_not_ready());
  }

  #[tokio::test]
  async fn concurrent_calls_leave_no_live_activations() {
    let service = DetectionService::new(BackendConfig::CompactCnn { seed: 9 });
    service.initialize().await.unwrap();
    let bytes = {
      use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
      let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 40, Rgb([120, 90, 60])));
      let mut bytes = Vec::new();
      image.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
      bytes
    };

    let (a, b, ()) = tokio::join!(service.classify(&bytes), service.classify(&bytes), service.dispose());
    for result in [&a, &b] {
      assert!(
        result.is_ok() || result.as_ref().is_err_and(ServiceError::is_not_ready),
        "{result:?}"
      );
    }
    assert_eq!(service.state(), ServiceState::Disposed);
    let ledgers = service.ledgers().await.unwrap();
    assert_eq!(ledgers.activations.live(), 0);
    assert_eq!(ledgers.parameters.live(), 0);
  }

  #[tokio::test]
  async fn mock_reports_carry_notes_and_version() {
    let service = DetectionService::new(BackendConfig::Mock(MockConfig::instant(7)));
    service.initialize().await.unwrap();
    let detailed = service.classify_detailed(PNG_HEADER).await.unwrap();
    assert_eq!(detailed.kind, ImageKind::Png);
    assert_eq!(detailed.report.model_version, "mock-v1.0");
    assert!(detailed.report.notes.is_some());
    assert!((0.0..=1.0).contains(&detailed.report.confidence));

    service.dispose().await;
    assert_eq!(service.state(), ServiceState::Disposed);
    assert!(service.classify(PNG_HEADER).await.unwrap_err().is_not_ready());
  }
}
