// 该文件是 Xiongpian （胸片） 项目的一部分。
// tests/detection_service.rs - 检测服务端到端
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

mod common;

use url::Url;
use xiongpian::{
  FromUrl,
  backend::{BackendConfig, Scoring},
  intake::{ImageKind, IntakeError, IntakePolicy},
  lifecycle::ServiceState,
  model::{ArchitectureKind, HeuristicBackend},
  report::DetectionStatus,
  service::{DetectionService, ServiceError},
};

async fn heuristic_service() -> DetectionService {
  let service = DetectionService::new(BackendConfig::Heuristic {
    seed: HeuristicBackend::DEFAULT_SEED,
  });
  service.initialize().await.unwrap();
  service
}

#[tokio::test]
async fn white_scan_is_pushed_towards_normal() {
  let service = heuristic_service().await;
  let detailed = service.classify_detailed(&common::solid_png(255)).await.unwrap();
  assert_eq!(detailed.kind, ImageKind::Png);

  let Scoring::Probabilities {
    raw,
    adjustment: Some(adjustment),
  } = detailed.scoring
  else {
    panic!("heuristic backend must report an adjustment");
  };
  assert!(adjustment.stats.avg_brightness > 180.0);
  assert!(adjustment.reweighted.p_normal() > raw.p_normal());

  let winner = adjustment.adjusted.winner();
  assert!(adjustment.adjusted.get(winner) <= 0.95 + 1e-6);
  assert!(adjustment.adjusted.get(winner.other()) >= 0.05 - 1e-6);
  assert_eq!(detailed.report.status, DetectionStatus::from(winner));
}

#[tokio::test]
async fn black_scan_is_pushed_towards_pneumonia() {
  let service = heuristic_service().await;
  let detailed = service.classify_detailed(&common::solid_png(0)).await.unwrap();
  let Scoring::Probabilities {
    raw,
    adjustment: Some(adjustment),
  } = detailed.scoring
  else {
    panic!("heuristic backend must report an adjustment");
  };
  assert!(adjustment.stats.avg_brightness < 100.0);
  assert!(adjustment.reweighted.p_pneumonia() > raw.p_pneumonia());
}

#[tokio::test]
async fn heuristic_reports_are_labelled_non_diagnostic() {
  let service = heuristic_service().await;
  let version = service.version();
  assert_eq!(version.architecture, ArchitectureKind::FeatureExtractorHeuristic);
  assert!(!version.diagnostic);

  let report = service.classify(&common::chest_like_jpeg()).await.unwrap();
  assert!(report.notes.is_some());
  assert_eq!(report.model_version, "heuristic-baseline-v1.0");
  assert_eq!(
    service.ledgers().await.unwrap().activations.live(),
    0
  );
}

#[tokio::test]
async fn lifecycle_is_visible_through_the_service() {
  let service = DetectionService::new(
    BackendConfig::from_url(&Url::parse("compact-cnn:?seed=5").unwrap()).unwrap(),
  );
  assert_eq!(service.state(), ServiceState::Uninitialized);
  assert!(service.classify(&common::solid_png(90)).await.unwrap_err().is_not_ready());

  service.initialize().await.unwrap();
  service.initialize().await.unwrap();
  assert!(service.is_ready());

  let report = service.classify(&common::chest_like_jpeg()).await.unwrap();
  assert!((0.0..=1.0).contains(&report.confidence));
  assert!(report.notes.is_none());
  assert_eq!(report.model_version, "compact-cnn-v1.0");

  service.dispose().await;
  assert!(!service.is_ready());
  assert_eq!(service.state(), ServiceState::Disposed);
  assert!(service.classify(&common::solid_png(90)).await.unwrap_err().is_not_ready());
  assert_eq!(service.ledgers().await.unwrap().parameters.live(), 0);
}

#[tokio::test]
async fn intake_policy_guards_the_pipeline() {
  let service = DetectionService::new(BackendConfig::Heuristic { seed: 1 }).with_policy(IntakePolicy {
    max_bytes: 64,
    ..IntakePolicy::default()
  });
  service.initialize().await.unwrap();

  assert!(matches!(
    service.classify(&common::solid_png(10)).await,
    Err(ServiceError::Intake(IntakeError::TooLarge { limit: 64, .. }))
  ));
  assert!(matches!(
    service.classify(&[]).await,
    Err(ServiceError::Intake(IntakeError::Empty))
  ));
}
