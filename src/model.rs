// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

/// 单次前向推理
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 概率和允许的误差
pub const PROBABILITY_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("输入通道数不匹配: 期望 {expected}, 实际 {actual}")]
  ChannelMismatch { expected: usize, actual: usize },
  #[error("特征图为空，无法池化")]
  EmptyFeatureMap,
  #[error("概率向量无效: [{0}, {1}]")]
  InvalidProbabilities(f32, f32),
}

/// `[p_normal, p_pneumonia]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilityVector {
  p_normal: f32,
  p_pneumonia: f32,
}

impl ProbabilityVector {
  pub fn new(p_normal: f32, p_pneumonia: f32) -> Result<Self, ModelError> {
    let in_range = |p: f32| p.is_finite() && (0.0..=1.0).contains(&p);
    if !in_range(p_normal)
      || !in_range(p_pneumonia)
      || ((p_normal + p_pneumonia) - 1.0).abs() > PROBABILITY_TOLERANCE
    {
      return Err(ModelError::InvalidProbabilities(p_normal, p_pneumonia));
    }
    Ok(Self {
      p_normal,
      p_pneumonia,
    })
  }

  /// 对两个非负权重归一化
  pub fn normalize(normal: f32, pneumonia: f32) -> Result<Self, ModelError> {
    let sum = normal + pneumonia;
    if !(sum.is_finite() && sum > 0.0 && normal >= 0.0 && pneumonia >= 0.0) {
      return Err(ModelError::InvalidProbabilities(normal, pneumonia));
    }
    Self::new(normal / sum, pneumonia / sum)
  }

  pub fn p_normal(&self) -> f32 {
    self.p_normal
  }

  pub fn p_pneumonia(&self) -> f32 {
    self.p_pneumonia
  }

  /// 概率较大的一类，相等时取 Normal
  pub fn winner(&self) -> Prediction {
    if self.p_pneumonia > self.p_normal {
      Prediction::Pneumonia
    } else {
      Prediction::Normal
    }
  }

  pub fn get(&self, class: Prediction) -> f32 {
    match class {
      Prediction::Normal => self.p_normal,
      Prediction::Pneumonia => self.p_pneumonia,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Prediction {
  Normal,
  Pneumonia,
}

impl Prediction {
  pub fn other(&self) -> Self {
    match self {
      Prediction::Normal => Prediction::Pneumonia,
      Prediction::Pneumonia => Prediction::Normal,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchitectureKind {
  CompactCnn,
  DeepSeparableCnn,
  FeatureExtractorHeuristic,
  MockGenerator,
  RemoteDelegate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
  pub version: String,
  pub architecture: ArchitectureKind,
  /// 结果能否作为诊断参考
  pub diagnostic: bool,
}

pub mod layers;

mod compact_cnn;
mod heuristic;
mod mock;
#[cfg(feature = "remote_delegate")]
mod remote;
mod separable_cnn;

pub use self::compact_cnn::{CompactCnn, CompactCnnBackend};
pub use self::heuristic::{FeatureExtractor, HeuristicBackend, HeuristicHead, SeparableTrunkExtractor};
pub use self::mock::{MockBackend, MockConfig};
#[cfg(feature = "remote_delegate")]
pub use self::remote::{RemoteBackend, RemoteConfig};
pub use self::separable_cnn::{SeparableBlockConfig, SeparableCnn, SeparableCnnBackend, SeparableTrunk, SEPARABLE_BLOCKS};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_vectors_that_do_not_sum_to_one() {
    assert!(ProbabilityVector::new(0.5, 0.5).is_ok());
    assert!(ProbabilityVector::new(0.5004, 0.5).is_ok());
    assert!(ProbabilityVector::new(0.6, 0.6).is_err());
    assert!(ProbabilityVector::new(f32::NAN, 1.0).is_err());
    assert!(ProbabilityVector::new(-0.1, 1.1).is_err());
  }

  #[test]
  fn ties_go_to_normal() {
    let v = ProbabilityVector::new(0.5, 0.5).unwrap();
    assert_eq!(v.winner(), Prediction::Normal);
    let v = ProbabilityVector::normalize(1.0, 3.0).unwrap();
    assert_eq!(v.winner(), Prediction::Pneumonia);
    assert!((v.p_pneumonia() - 0.75).abs() < 1e-6);
  }
}
