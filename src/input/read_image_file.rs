// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/input/read_image_file.rs - 单个图像文件输入
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::Scan};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误 ({path}): {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// `image:///path/to/scan.png`，只产出一次
pub struct ImageFileInput {
  scan: Option<Scan>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = PathBuf::from(crate::url_path(url));
    let scan = Scan::read(&path).map_err(|source| ImageFileInputError::IoError {
      path: path.clone(),
      source,
    })?;
    info!("读取图像文件 {} ({} 字节)", path.display(), scan.bytes.len());

    Ok(ImageFileInput { scan: Some(scan) })
  }
}

impl Iterator for ImageFileInput {
  type Item = Scan;

  fn next(&mut self) -> Option<Self::Item> {
    self.scan.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_the_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chest film.png");
    std::fs::write(&path, b"\x89PNG-bytes").unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let scan = input.next().unwrap();
    assert_eq!(scan.name, "chest film.png");
    assert_eq!(scan.bytes, b"\x89PNG-bytes");
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_file_is_reported() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError { .. })
    ));
  }
}
