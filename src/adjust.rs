// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/adjust.rs - 置信度修正
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

//! 基于像素统计的规则修正，只用于启发式后端。

use serde::Serialize;
use tracing::debug;

use crate::model::{ModelError, Prediction, ProbabilityVector};
use crate::stats::PixelStatistics;

const HIGH_CONTRAST: f32 = 60.0;
const DARK_RATIO_BAND: (f32, f32) = (0.35, 0.65);
const DIM_BRIGHTNESS: f32 = 100.0;
const BRIGHT_BRIGHTNESS: f32 = 180.0;

const CONTRAST_FACTOR: f32 = 1.3;
const DARK_RATIO_FACTOR: f32 = 1.2;
const DIM_FACTOR: f32 = 1.4;
const BRIGHT_FACTOR: f32 = 1.2;

const DECISIVENESS_BOOST: f32 = 0.15;
const WINNER_CEILING: f32 = 0.95;

/// 修正过程的中间结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
  pub stats: PixelStatistics,
  /// 按规则加权并归一化后的向量
  pub reweighted: ProbabilityVector,
  /// 增强决断性后的最终向量
  pub adjusted: ProbabilityVector,
}

/// 按像素统计对两类概率加权，然后归一化
pub fn reweigh(raw: ProbabilityVector, stats: &PixelStatistics) -> Result<ProbabilityVector, ModelError> {
  let mut normal = raw.p_normal();
  let mut pneumonia = raw.p_pneumonia();

  if stats.contrast > HIGH_CONTRAST {
    pneumonia *= CONTRAST_FACTOR;
  }
  if stats.dark_pixel_ratio > DARK_RATIO_BAND.0 && stats.dark_pixel_ratio < DARK_RATIO_BAND.1 {
    pneumonia *= DARK_RATIO_FACTOR;
  }
  if stats.avg_brightness < DIM_BRIGHTNESS {
    pneumonia *= DIM_FACTOR;
  } else if stats.avg_brightness > BRIGHT_BRIGHTNESS {
    normal *= BRIGHT_FACTOR;
  }

  ProbabilityVector::normalize(normal, pneumonia)
}

/// 胜出一方加 0.15（上限 0.95），另一方取补数
pub fn sharpen(v: ProbabilityVector) -> Result<ProbabilityVector, ModelError> {
  let winner = v.winner();
  let boosted = (v.get(winner) + DECISIVENESS_BOOST).min(WINNER_CEILING);
  match winner {
    Prediction::Normal => ProbabilityVector::new(boosted, 1.0 - boosted),
    Prediction::Pneumonia => ProbabilityVector::new(1.0 - boosted, boosted),
  }
}

pub fn adjust(raw: ProbabilityVector, stats: PixelStatistics) -> Result<Adjustment, ModelError> {
  let reweighted = reweigh(raw, &stats)?;
  let adjusted = sharpen(reweighted)?;
  debug!(
    "置信度修正: {:?} -> {:?} -> {:?}, 统计: {:?}",
    raw, reweighted, adjusted, stats
  );
  Ok(Adjustment {
    stats,
    reweighted,
    adjusted,
  })
}
