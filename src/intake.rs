// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/intake.rs - 上传图像检查
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

use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;

/// 10 MiB
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageKind {
  Jpeg,
  Png,
}

impl ImageKind {
  pub fn extension(&self) -> &'static str {
    match self {
      ImageKind::Jpeg => "jpg",
      ImageKind::Png => "png",
    }
  }

  /// 按文件头识别，不是 JPEG 或 PNG 时为 `None`
  pub fn sniff(bytes: &[u8]) -> Option<Self> {
    image::guess_format(bytes).ok().and_then(Self::from_format)
  }

  fn from_format(format: ImageFormat) -> Option<Self> {
    match format {
      ImageFormat::Jpeg => Some(ImageKind::Jpeg),
      ImageFormat::Png => Some(ImageKind::Png),
      _ => None,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
  #[error("图像为空")]
  Empty,
  #[error("图像过大: {size} 字节，上限 {limit} 字节")]
  TooLarge { size: usize, limit: usize },
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
}

/// 进入推理流程前的格式与大小检查
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakePolicy {
  pub max_bytes: usize,
  pub accepted: Vec<ImageKind>,
}

impl Default for IntakePolicy {
  fn default() -> Self {
    Self {
      max_bytes: DEFAULT_MAX_BYTES,
      accepted: vec![ImageKind::Jpeg, ImageKind::Png],
    }
  }
}

impl IntakePolicy {
  /// 按文件头识别格式，不解码
  pub fn validate(&self, bytes: &[u8]) -> Result<ImageKind, IntakeError> {
    if bytes.is_empty() {
      return Err(IntakeError::Empty);
    }
    if bytes.len() > self.max_bytes {
      return Err(IntakeError::TooLarge {
        size: bytes.len(),
        limit: self.max_bytes,
      });
    }

    let format = image::guess_format(bytes)
      .map_err(|_| IntakeError::UnsupportedFormat("未知".to_string()))?;
    ImageKind::from_format(format)
      .filter(|kind| self.accepted.contains(kind))
      .ok_or_else(|| IntakeError::UnsupportedFormat(format!("{:?}", format)))
  }
}
