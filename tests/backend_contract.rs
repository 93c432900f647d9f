// 该文件是 Xiongpian （胸片） 项目的一部分。
// tests/backend_contract.rs - 评分后端的共同约定
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

use xiongpian::{
  backend::{Backend, BackendConfig, BackendError, Sample, Scoring, ScoringBackend},
  lifecycle::ServiceState,
  model::{
    CompactCnnBackend, HeuristicBackend, MockConfig, PROBABILITY_TOLERANCE, SeparableCnnBackend,
  },
};

fn configs() -> Vec<BackendConfig> {
  let mut configs = vec![
    BackendConfig::CompactCnn {
      seed: CompactCnnBackend::DEFAULT_SEED,
    },
    BackendConfig::SeparableCnn {
      seed: SeparableCnnBackend::DEFAULT_SEED,
    },
    BackendConfig::Heuristic {
      seed: HeuristicBackend::DEFAULT_SEED,
    },
    BackendConfig::Mock(MockConfig::instant(11)),
  ];
  #[cfg(feature = "remote_delegate")]
  configs.push(BackendConfig::Remote(Default::default()));
  configs
}

fn numeric_configs() -> Vec<BackendConfig> {
  configs()
    .into_iter()
    .filter(|c| {
      matches!(
        c,
        BackendConfig::CompactCnn { .. } | BackendConfig::SeparableCnn { .. } | BackendConfig::Heuristic { .. }
      )
    })
    .collect()
}

#[tokio::test]
async fn classify_before_initialize_is_not_ready() {
  let bytes = common::solid_png(120);
  for config in configs() {
    let mut backend = Backend::from(config.clone());
    assert_eq!(backend.state(), ServiceState::Uninitialized);
    assert!(!backend.is_ready());
    let result = backend.classify(&Sample::new(&bytes)).await;
    assert!(
      matches!(result, Err(BackendError::NotReady(ServiceState::Uninitialized))),
      "{config:?}: {result:?}"
    );
  }
}

#[tokio::test]
async fn dispose_makes_every_backend_unusable() {
  let bytes = common::solid_png(120);
  for config in configs() {
    let mut backend = Backend::from(config.clone());
    backend.initialize().await.unwrap();
    assert!(backend.is_ready(), "{config:?}");
    backend.dispose();
    assert!(!backend.is_ready());
    assert_eq!(backend.state(), ServiceState::Disposed);
    assert!(
      matches!(
        backend.classify(&Sample::new(&bytes)).await,
        Err(BackendError::NotReady(ServiceState::Disposed))
      ),
      "{config:?}"
    );
    assert!(backend.initialize().await.is_err(), "{config:?}");
  }
}

#[tokio::test]
async fn numeric_backends_emit_valid_probabilities_and_release_tensors() {
  let inputs = [common::solid_png(255), common::chest_like_jpeg()];
  for config in numeric_configs() {
    let mut backend = Backend::from(config.clone());
    backend.initialize().await.unwrap();
    let ledgers = backend.ledgers().cloned().unwrap();
    let parameters = ledgers.parameters.live();
    assert!(parameters > 0);

    for bytes in &inputs {
      match backend.classify(&Sample::new(bytes)).await.unwrap() {
        Scoring::Probabilities { raw, adjustment } => {
          for v in [Some(raw), adjustment.map(|a| a.adjusted)].into_iter().flatten() {
            assert!((0.0..=1.0).contains(&v.p_normal()), "{config:?}: {v:?}");
            assert!((0.0..=1.0).contains(&v.p_pneumonia()), "{config:?}: {v:?}");
            assert!(((v.p_normal() + v.p_pneumonia()) - 1.0).abs() <= PROBABILITY_TOLERANCE);
          }
        }
        other => panic!("{config:?}: unexpected scoring {other:?}"),
      }
      assert_eq!(ledgers.activations.live(), 0, "{config:?}");
      assert_eq!(ledgers.parameters.live(), parameters, "{config:?}");
    }

    // 解码失败也不能遗留中间张量
    assert!(matches!(
      backend.classify(&Sample::new(b"\x89PNG\r\n\x1a\ntruncated")).await,
      Err(BackendError::Decode(_))
    ));
    assert_eq!(ledgers.activations.live(), 0);

    backend.dispose();
    assert_eq!(ledgers.parameters.live(), 0, "{config:?}");
  }
}

#[tokio::test]
async fn initialize_twice_builds_parameters_once() {
  for config in numeric_configs() {
    let mut backend = Backend::from(config.clone());
    backend.initialize().await.unwrap();
    let ledgers = backend.ledgers().cloned().unwrap();
    let allocations = ledgers.parameters.total_allocations();
    backend.initialize().await.unwrap();
    assert_eq!(ledgers.parameters.total_allocations(), allocations, "{config:?}");
    assert!(backend.is_ready());
  }
}

#[tokio::test]
async fn same_seed_gives_the_same_answer() {
  let bytes = common::chest_like_jpeg();
  let config = BackendConfig::CompactCnn { seed: 77 };
  let mut a = Backend::from(config.clone());
  let mut b = Backend::from(config);
  a.initialize().await.unwrap();
  b.initialize().await.unwrap();
  assert_eq!(
    a.classify(&Sample::new(&bytes)).await.unwrap(),
    b.classify(&Sample::new(&bytes)).await.unwrap()
  );
}
