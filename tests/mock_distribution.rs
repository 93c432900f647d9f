// 该文件是 Xiongpian （胸片） 项目的一部分。
// tests/mock_distribution.rs - 模拟后端的结论比例
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

use rand::{SeedableRng, rngs::StdRng};

use xiongpian::{model::MockBackend, report::DetectionStatus};

const DRAWS: usize = 10_000;
const TOLERANCE: f64 = 0.02;

#[test]
fn ten_thousand_draws_follow_the_configured_rates() {
  for seed in [1u64, 2024, 0xDEAD_BEEF] {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut positive, mut negative, mut inconclusive) = (0usize, 0usize, 0usize);
    for _ in 0..DRAWS {
      match MockBackend::draw(&mut rng).status {
        DetectionStatus::Pneumonia => positive += 1,
        DetectionStatus::Normal => negative += 1,
        DetectionStatus::Inconclusive => inconclusive += 1,
      }
    }

    let rate = |n: usize| n as f64 / DRAWS as f64;
    assert!((rate(positive) - 0.30).abs() <= TOLERANCE, "seed {seed}: {positive}");
    assert!((rate(negative) - 0.55).abs() <= TOLERANCE, "seed {seed}: {negative}");
    assert!((rate(inconclusive) - 0.15).abs() <= TOLERANCE, "seed {seed}: {inconclusive}");
  }
}
