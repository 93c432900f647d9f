// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/input/directory_input.rs - 目录批量输入
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

use std::path::{Path, PathBuf};
use std::vec::IntoIter;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::Scan};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取目录 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// `folder:///path/to/scans`，按文件名顺序产出其中的 JPEG/PNG 文件
pub struct DirectoryInput {
  files: IntoIter<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

fn is_image(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      .unwrap_or(false)
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemeMismatch);
    }

    let directory = PathBuf::from(crate::url_path(url));
    let io_error = |source| DirectoryInputError::IoError {
      path: directory.clone(),
      source,
    };
    let mut files = std::fs::read_dir(&directory)
      .map_err(io_error)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| is_image(path))
      .collect::<Vec<_>>();
    files.sort();
    info!("目录 {} 中共有 {} 张图像", directory.display(), files.len());

    Ok(Self {
      files: files.into_iter(),
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = Scan;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match Scan::read(&path) {
        Ok(scan) => return Some(scan),
        Err(e) => warn!("跳过无法读取的文件 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lists_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.PNG", "a.jpg", "notes.txt", "c.jpeg"] {
      std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let names: Vec<_> = DirectoryInput::from_url(&url)
      .unwrap()
      .map(|scan| scan.name)
      .collect();
    assert_eq!(names, ["a.jpg", "b.PNG", "c.jpeg"]);
  }
}
