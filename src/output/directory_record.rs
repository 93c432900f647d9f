// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 按日期分目录保存原图与 JSON 结果，目录结构为 `YYYY/MM/DD/HH-MM-SS-XXXX.*`。

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Scan,
  intake::ImageKind,
  output::Render,
  report::{DetectionReport, DetectionStatus},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 写入磁盘的记录
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Record<'a> {
  source: &'a str,
  image: String,
  recorded_at: String,
  #[serde(flatten)]
  report: &'a DetectionReport,
}

/// `folder:///records`，加 `?flagged` 时只保存非正常结果
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  flagged_only: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let flagged_only = uri.query_pairs().any(|(k, _)| k == "flagged");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(crate::url_path(uri)),
      frame_counter: AtomicU16::new(0),
      flagged_only,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 返回不带扩展名的记录路径，日期目录不存在时创建
  fn record_stem(&self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<Scan, DetectionReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Scan, result: &DetectionReport) -> Result<(), Self::Error> {
    if self.flagged_only && result.status == DetectionStatus::Normal {
      debug!("{} 结果正常，跳过记录", frame.name);
      return Ok(());
    }

    let now = Utc::now();
    let stem = self.record_stem(&now)?;
    let extension = ImageKind::sniff(&frame.bytes).map_or("bin", |kind| kind.extension());
    let image_path = stem.with_extension(extension);
    std::fs::write(&image_path, &frame.bytes)?;

    let record = Record {
      source: &frame.name,
      image: image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      recorded_at: now.to_rfc3339(),
      report: result,
    };
    let json_path = stem.with_extension("json");
    std::fs::write(&json_path, serde_json::to_vec_pretty(&record)?)?;
    debug!("记录已保存: {}", json_path.display());
    Ok(())
  }
}
