//! Scripted transport and recording handler for scheduler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Delivery, FetchHandler};
use crate::cache::{http_date, CachedResponse};
use crate::error::FetchError;
use crate::host::Clock;
use crate::http::{Request, Transport};

#[derive(Debug, Clone)]
pub enum Step {
  Respond(CachedResponse),
  NetworkDown,
}

/// Answers from a script, then repeats `fallback` forever.
pub struct ScriptedTransport {
  script: Mutex<VecDeque<Step>>,
  fallback: Step,
  clock: Arc<dyn Clock>,
  requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
  pub fn new(fallback: Step, clock: Arc<dyn Clock>) -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback,
      clock,
      requests: Mutex::new(Vec::new()),
    }
  }

  pub fn push(&self, step: Step) {
    self.script.lock().push_back(step);
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().len()
  }

  pub fn calls_for(&self, url: &str) -> usize {
    self.requests.lock().iter().filter(|r| r.url == url).count()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().clone()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &Request) -> Result<CachedResponse, FetchError> {
    self.requests.lock().push(request.clone());
    let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());

    match step {
      Step::Respond(mut response) => {
        if !response.has_header("date") {
          response.headers.push(("date".to_string(), http_date(self.clock.now())));
        }
        Ok(response)
      }
      Step::NetworkDown => Err(FetchError::Network {
        message: "connection refused".to_string(),
      }),
    }
  }
}

/// Keeps every callback invocation.
#[derive(Default)]
pub struct Recorder {
  deliveries: Mutex<Vec<Delivery>>,
  errors: Mutex<Vec<FetchError>>,
}

impl Recorder {
  pub fn deliveries(&self) -> Vec<Delivery> {
    self.deliveries.lock().clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self.errors.lock().iter().map(|e| e.to_string()).collect()
  }

  pub fn error_statuses(&self) -> Vec<Option<u16>> {
    self.errors.lock().iter().map(FetchError::status).collect()
  }

  pub fn error_bodies(&self) -> Vec<Option<String>> {
    self
      .errors
      .lock()
      .iter()
      .map(|e| e.response_text().map(String::from))
      .collect()
  }
}

impl FetchHandler for Recorder {
  fn process_data(&self, delivery: Delivery) {
    self.deliveries.lock().push(delivery);
  }

  fn process_error(&self, error: &FetchError) {
    self.errors.lock().push(error.clone());
  }
}
