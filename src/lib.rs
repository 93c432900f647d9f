// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod adjust;
pub mod args;
pub mod backend;
pub mod frame;
pub mod input;
pub mod intake;
pub mod lifecycle;
pub mod model;
pub mod output;
pub mod preprocess;
pub mod report;
pub mod service;
pub mod stats;
pub mod task;
pub mod tensor;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 读取 URL 查询参数，并解析为目标类型
pub(crate) fn query_param<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<Result<T, String>> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .map(|(_, v)| v.parse::<T>().map_err(|_| format!("参数 {} 的值无效: {}", key, v)))
}

/// 将 URL 路径解码为文件系统路径
pub(crate) fn url_path(url: &url::Url) -> String {
  urlencoding::decode(url.path())
    .map(|p| p.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}
