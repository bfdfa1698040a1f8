//! Network transport.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

use crate::cache::{http_date, CachedResponse};
use crate::error::FetchError;
use crate::host::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
      headers: Vec::new(),
    }
  }

  pub fn head(url: impl Into<String>) -> Self {
    Self {
      method: Method::Head,
      ..Self::get(url)
    }
  }

  pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
    self.headers = headers;
    self
  }
}

/// Sends requests. Any response, whatever its status, is `Ok`; only failures
/// to get a response at all are errors.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> Result<CachedResponse, FetchError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
  client: Client,
  clock: Arc<dyn Clock>,
}

impl ReqwestTransport {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self::with_client(Client::new(), clock)
  }

  pub fn with_client(client: Client, clock: Arc<dyn Clock>) -> Self {
    Self { client, clock }
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &Request) -> Result<CachedResponse, FetchError> {
    let mut builder = match request.method {
      Method::Get => self.client.get(&request.url),
      Method::Head => self.client.head(&request.url),
    };
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await?;

    let status = response.status();
    let url = response.url().to_string();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response.bytes().await?;

    let mut cached = CachedResponse {
      url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    };

    // Freshness is computed from the date header; stamp one if the origin didn't.
    if !cached.has_header("date") {
      cached.headers.push(("date".to_string(), http_date(self.clock.now())));
    }

    tracing::debug!(url = %request.url, status = cached.status, bytes = cached.body.len(), "response received");

    Ok(cached)
  }
}

/// Append a `cb=<token>` query parameter so intermediaries can't answer from
/// their own cache.
pub fn with_cache_buster(url: &str, token: i64) -> String {
  match Url::parse(url) {
    Ok(mut parsed) => {
      parsed.query_pairs_mut().append_pair("cb", &token.to_string());
      parsed.to_string()
    }
    Err(_) => {
      let separator = if url.contains('?') { '&' } else { '?' };
      format!("{}{}cb={}", url, separator, token)
    }
  }
}
