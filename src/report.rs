// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/report.rs - 结果生成
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

use serde::{Deserialize, Serialize};

use crate::backend::Scoring;
use crate::model::{ModelDescriptor, Prediction, ProbabilityVector};

/// 对外的检测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
  Normal,
  Pneumonia,
  Inconclusive,
}

impl From<Prediction> for DetectionStatus {
  fn from(prediction: Prediction) -> Self {
    match prediction {
      Prediction::Normal => DetectionStatus::Normal,
      Prediction::Pneumonia => DetectionStatus::Pneumonia,
    }
  }
}

/// 概率型后端的分类结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
  pub prediction: Prediction,
  pub confidence: f32,
  pub processing_time_ms: u64,
  pub model_version: String,
}

impl ClassificationResult {
  pub fn from_probabilities(
    probabilities: ProbabilityVector,
    elapsed: Duration,
    descriptor: &ModelDescriptor,
  ) -> Self {
    let prediction = probabilities.winner();
    Self {
      prediction,
      confidence: round4(probabilities.get(prediction)),
      processing_time_ms: millis(elapsed),
      model_version: descriptor.version.clone(),
    }
  }
}

/// 交给持久化与展示方的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
  pub status: DetectionStatus,
  pub confidence: f32,
  pub processing_time_ms: u64,
  pub model_version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

const NON_DIAGNOSTIC_NOTE: &str =
  "Heuristic baseline with untrained weights; not a diagnostic result.";

impl From<ClassificationResult> for DetectionReport {
  fn from(result: ClassificationResult) -> Self {
    Self {
      status: result.prediction.into(),
      confidence: result.confidence,
      processing_time_ms: result.processing_time_ms,
      model_version: result.model_version,
      notes: None,
    }
  }
}

/// 将后端输出整理为统一结果
pub fn synthesize(scoring: &Scoring, elapsed: Duration, descriptor: &ModelDescriptor) -> DetectionReport {
  match scoring {
    Scoring::Probabilities { raw, adjustment } => {
      let final_vector = adjustment.as_ref().map(|a| a.adjusted).unwrap_or(*raw);
      let mut report: DetectionReport =
        ClassificationResult::from_probabilities(final_vector, elapsed, descriptor).into();
      if !descriptor.diagnostic {
        report.notes = Some(NON_DIAGNOSTIC_NOTE.to_string());
      }
      report
    }
    Scoring::Verdict(verdict) => DetectionReport {
      status: verdict.status,
      confidence: round4(verdict.confidence.clamp(0.0, 1.0)),
      processing_time_ms: millis(elapsed),
      model_version: verdict
        .model_version
        .clone()
        .unwrap_or_else(|| descriptor.version.clone()),
      notes: verdict.notes.clone(),
    },
  }
}

fn round4(value: f32) -> f32 {
  (value * 10_000.0).round() / 10_000.0
}

fn millis(elapsed: Duration) -> u64 {
  (elapsed.as_secs_f64() * 1000.0).round() as u64
}
