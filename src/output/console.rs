// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/output/console.rs - 日志与标准输出
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

use std::io::Write;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Scan,
  output::Render,
  report::{DetectionReport, DetectionStatus},
};

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// `log:`，结果写入 tracing 日志
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch);
    }
    Ok(LogOutput)
  }
}

impl Render<Scan, DetectionReport> for LogOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, frame: &Scan, result: &DetectionReport) -> Result<(), Self::Error> {
    let line = format!(
      "{}: {:?} 置信度 {:.2}% ({} ms, {})",
      frame.name,
      result.status,
      result.confidence * 100.0,
      result.processing_time_ms,
      result.model_version
    );
    match result.status {
      DetectionStatus::Pneumonia => warn!("{}", line),
      _ => info!("{}", line),
    }
    if let Some(notes) = &result.notes {
      info!("{}: {}", frame.name, notes);
    }
    Ok(())
  }
}

/// `stdout:`，每个结果一行 JSON
pub struct StdoutOutput;

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch);
    }
    Ok(StdoutOutput)
  }
}

#[derive(Serialize)]
struct NamedReport<'a> {
  name: &'a str,
  #[serde(flatten)]
  report: &'a DetectionReport,
}

impl StdoutOutput {
  fn write_line<W: Write>(mut writer: W, frame: &Scan, result: &DetectionReport) -> Result<(), ConsoleOutputError> {
    serde_json::to_writer(
      &mut writer,
      &NamedReport {
        name: &frame.name,
        report: result,
      },
    )?;
    writeln!(writer)?;
    Ok(())
  }
}

impl Render<Scan, DetectionReport> for StdoutOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, frame: &Scan, result: &DetectionReport) -> Result<(), Self::Error> {
    let stdout = std::io::stdout();
    Self::write_line(stdout.lock(), frame, result)
  }
}
