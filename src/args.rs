// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
  FromUrl,
  backend::{BackendConfig, BackendConfigError},
};

/// Xiongpian 胸片检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 评分后端
  /// 支持:
  /// - compact-cnn:?seed=1
  /// - separable-cnn:?seed=1
  /// - heuristic:?seed=1
  /// - mock:?min_delay_ms=2000&max_delay_ms=4000
  /// - remote:?endpoint=https://host/detect
  #[arg(long, value_name = "BACKEND", default_value = "heuristic:")]
  pub backend: Url,

  /// 输入来源，image:///scan.png 或 folder:///scans
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出，log:、stdout: 或 folder:///records
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,

  /// 远程后端的访问令牌，URL 中已给出时忽略
  #[arg(long, env = "XIONGPIAN_REMOTE_TOKEN", hide_env_values = true)]
  pub token: Option<String>,

  /// 最多处理的图像数量（仅对目录输入有效）
  #[arg(long, value_name = "COUNT")]
  pub scan_limit: Option<usize>,

  /// 重复检测次数（仅对 simple-repeatshot 有效）
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
}

impl Args {
  pub fn backend_config(&self) -> Result<BackendConfig, BackendConfigError> {
    #[allow(unused_mut)]
    let mut config = BackendConfig::from_url(&self.backend)?;
    #[cfg(feature = "remote_delegate")]
    if let BackendConfig::Remote(remote) = &mut config {
      if remote.token.is_none() {
        remote.token = self.token.clone();
      }
    }
    Ok(config)
  }
}

/// 未设置 RUST_LOG 时默认输出 info 级别
pub fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}
