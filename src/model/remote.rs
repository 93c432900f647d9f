// 该文件是 Xiongpian （胸片） 项目的一部分。
// src/model/remote.rs - 远程委托后端
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

//! 把原始图像字节 POST 到外部服务，由对方给出结论。
//!
//! 不做重试，任何传输错误或非 2xx 状态都直接作为网络错误返回。

use std::time::Duration;

use reqwest::{Client, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  backend::{BackendConfigError, BackendError, Sample, Scoring, ScoringBackend, Verdict},
  lifecycle::{Lifecycle, ServiceState},
  model::{ArchitectureKind, ModelDescriptor},
  report::DetectionStatus,
};

const REMOTE_VERSION: &str = "remote-delegate";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// `remote:?endpoint=<url>&token=<bearer>&timeout_secs=30`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
  /// 为空时后端仍可构造，分类时报配置错误
  pub endpoint: Option<String>,
  pub token: Option<String>,
  pub timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      endpoint: None,
      token: None,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
  }
}

impl RemoteConfig {
  pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: Some(endpoint.into()),
      ..Self::default()
    }
  }

  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }
}

impl FromUrlWithScheme for RemoteConfig {
  const SCHEME: &'static str = "remote";
}

impl FromUrl for RemoteConfig {
  type Error = BackendConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(BackendConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let text = |key: &str| {
      url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
    };

    let endpoint = text("endpoint");
    if let Some(endpoint) = &endpoint {
      Url::parse(endpoint).map_err(|e| {
        BackendConfigError::InvalidParameter(format!("endpoint 无效 ({}): {}", endpoint, e))
      })?;
    }
    let timeout_secs = crate::query_param::<u64>(url, "timeout_secs")
      .transpose()
      .map_err(BackendConfigError::InvalidParameter)?
      .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(Self {
      endpoint,
      token: text("token"),
      timeout_secs,
    })
  }
}

/// 远程服务的响应，字段名兼容两种写法
#[derive(Debug, Deserialize)]
struct RemoteResponse {
  #[serde(alias = "prediction")]
  status: String,
  #[serde(alias = "score")]
  confidence: f32,
  #[serde(default, alias = "modelVersion")]
  model_version: Option<String>,
  #[serde(default)]
  notes: Option<String>,
}

impl TryFrom<RemoteResponse> for Verdict {
  type Error = BackendError;

  fn try_from(response: RemoteResponse) -> Result<Self, Self::Error> {
    let status = match response.status.trim().to_ascii_lowercase().as_str() {
      "normal" | "negative" => DetectionStatus::Normal,
      "pneumonia" | "positive" => DetectionStatus::Pneumonia,
      "inconclusive" => DetectionStatus::Inconclusive,
      other => {
        return Err(BackendError::Network(format!("无法识别的远程结论: {}", other)));
      }
    };

    // [0, 1] 按比例，(1, 100] 按百分制，其余拒绝
    let confidence = match response.confidence {
      c if (0.0..=1.0).contains(&c) => c,
      c if c > 1.0 && c <= 100.0 => c / 100.0,
      c => {
        return Err(BackendError::Network(format!("远程置信度无效: {}", c)));
      }
    };

    Ok(Verdict {
      status,
      confidence,
      notes: response.notes,
      model_version: response.model_version,
    })
  }
}

pub struct RemoteBackend {
  config: RemoteConfig,
  client: Option<Client>,
  lifecycle: Lifecycle,
}

impl RemoteBackend {
  pub fn new(config: RemoteConfig) -> Self {
    Self {
      config,
      client: None,
      lifecycle: Lifecycle::new(),
    }
  }

  async fn post(&self, client: &Client, endpoint: &str, bytes: &[u8]) -> Result<Verdict, BackendError> {
    let content_type = image::guess_format(bytes)
      .map(|f| f.to_mime_type())
      .unwrap_or(FALLBACK_CONTENT_TYPE);

    let mut request = client
      .post(endpoint)
      .header(CONTENT_TYPE, content_type)
      .body(bytes.to_vec());
    if let Some(token) = &self.config.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| {
      if e.is_timeout() {
        BackendError::Network(format!("请求超时 ({} 秒)", self.config.timeout_secs))
      } else {
        BackendError::Network(e.to_string())
      }
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      warn!("远程服务返回 {}: {}", status, body);
      return Err(BackendError::Network(format!(
        "远程服务返回 {}: {}",
        status.as_u16(),
        body
      )));
    }

    let parsed: RemoteResponse = response
      .json()
      .await
      .map_err(|e| BackendError::Network(format!("响应解析失败: {}", e)))?;
    debug!("远程响应: {:?}", parsed);
    parsed.try_into()
  }
}

impl ScoringBackend for RemoteBackend {
  async fn initialize(&mut self) -> Result<(), BackendError> {
    if !self.lifecycle.begin_initialize()? {
      return Ok(());
    }

    let client = Client::builder()
      .timeout(Duration::from_secs(self.config.timeout_secs))
      .build();
    match client {
      Ok(client) => {
        self.client = Some(client);
        self.lifecycle.finish_initialize(true);
        match &self.config.endpoint {
          Some(endpoint) => info!("远程后端就绪: {}", endpoint),
          None => warn!("远程后端未配置端点，分类请求将失败"),
        }
        Ok(())
      }
      Err(e) => {
        error!("HTTP 客户端构造失败: {}", e);
        self.lifecycle.finish_initialize(false);
        Err(BackendError::Init(e.to_string()))
      }
    }
  }

  async fn classify(&mut self, sample: &Sample<'_>) -> Result<Scoring, BackendError> {
    self.lifecycle.ensure_ready()?;
    let endpoint = self
      .config
      .endpoint
      .as_deref()
      .ok_or_else(|| BackendError::Configuration("未配置远程端点".to_string()))?;
    let client = self
      .client
      .as_ref()
      .ok_or(BackendError::NotReady(self.lifecycle.state()))?;

    debug!("向 {} 发送 {} 字节", endpoint, sample.bytes().len());
    let verdict = self.post(client, endpoint, sample.bytes()).await?;
    Ok(Scoring::Verdict(verdict))
  }

  fn dispose(&mut self) {
    self.client = None;
    let previous = self.lifecycle.dispose();
    debug!("释放远程后端 (之前状态: {:?})", previous);
  }

  fn version(&self) -> ModelDescriptor {
    ModelDescriptor {
      version: REMOTE_VERSION.to_string(),
      architecture: ArchitectureKind::RemoteDelegate,
      diagnostic: true,
    }
  }

  fn state(&self) -> ServiceState {
    self.lifecycle.state()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(json: &str) -> Result<Verdict, BackendError> {
    serde_json::from_str::<RemoteResponse>(json).unwrap().try_into()
  }

  #[test]
  fn response_aliases_are_accepted() {
    let verdict = response(r#"{"prediction":"Positive","score":87.5,"modelVersion":"r-2"}"#).unwrap();
    assert_eq!(verdict.status, DetectionStatus::Pneumonia);
    assert!((verdict.confidence - 0.875).abs() < 1e-6);
    assert_eq!(verdict.model_version.as_deref(), Some("r-2"));

    let verdict = response(r#"{"status":"normal","confidence":0.6,"notes":"clear"}"#).unwrap();
    assert_eq!(verdict.status, DetectionStatus::Normal);
    assert_eq!(verdict.notes.as_deref(), Some("clear"));
  }

  #[test]
  fn confidence_scale_boundaries() {
    let confidence = |value: &str| {
      response(&format!(r#"{{"status":"normal","confidence":{value}}}"#)).map(|v| v.confidence)
    };
    assert_eq!(confidence("1.0").unwrap(), 1.0);
    assert_eq!(confidence("0").unwrap(), 0.0);
    assert!((confidence("1.5").unwrap() - 0.015).abs() < 1e-6);
    assert_eq!(confidence("100").unwrap(), 1.0);
    assert!(matches!(confidence("100.5"), Err(BackendError::Network(_))));
    assert!(matches!(confidence("-0.1"), Err(BackendError::Network(_))));
  }

  #[test]
  fn unknown_status_is_a_network_error() {
    assert!(matches!(
      response(r#"{"status":"maybe","confidence":0.5}"#),
      Err(BackendError::Network(_))
    ));
  }

  #[test]
  fn config_parses_timeout_and_rejects_bad_endpoints() {
    let config = RemoteConfig::from_url(&Url::parse("remote:?timeout_secs=5").unwrap()).unwrap();
    assert_eq!(config.endpoint, None);
    assert_eq!(config.timeout_secs, 5);
    assert!(matches!(
      RemoteConfig::from_url(&Url::parse("remote:?endpoint=not%20a%20url").unwrap()),
      Err(BackendConfigError::InvalidParameter(_))
    ));
  }

  #[tokio::test]
  async fn missing_endpoint_fails_before_any_request() {
    let mut backend = RemoteBackend::new(RemoteConfig::default());
    backend.initialize().await.unwrap();
    assert!(matches!(
      backend.classify(&Sample::new(b"\x89PNG")).await,
      Err(BackendError::Configuration(_))
    ));
  }
}
