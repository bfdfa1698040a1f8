//! Reachability checks used to tell "server said no" from "client is offline".

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ProbeConfig;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
  /// Best effort; never fails.
  async fn is_offline(&self) -> bool;
}

/// HEAD request against an endpoint that is always up when the network is.
#[derive(Debug, Clone)]
pub struct HttpProbe {
  client: Client,
  endpoint: String,
}

impl HttpProbe {
  pub fn new(config: &ProbeConfig) -> Self {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .unwrap_or_default();

    Self::with_client(client, config.endpoint.clone())
  }

  pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
    Self {
      client,
      endpoint: endpoint.into(),
    }
  }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
  async fn is_offline(&self) -> bool {
    match self.client.head(&self.endpoint).send().await {
      Ok(_) => false,
      Err(e) => {
        tracing::debug!(endpoint = %self.endpoint, error = %e, "reachability check failed");
        true
      }
    }
  }
}

/// Offline signal provided by the host instead of probing.
#[derive(Debug, Clone, Default)]
pub struct SignalProbe {
  offline: Arc<AtomicBool>,
}

impl SignalProbe {
  pub fn new(offline: Arc<AtomicBool>) -> Self {
    Self { offline }
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }
}

#[async_trait]
impl ConnectivityProbe for SignalProbe {
  async fn is_offline(&self) -> bool {
    self.offline.load(Ordering::SeqCst)
  }
}
