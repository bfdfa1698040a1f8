//! The response representation stored by every cache backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// HTTP-date format (`Sun, 06 Nov 1994 08:49:37 GMT`).
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format a timestamp as an HTTP-date.
pub fn http_date(at: DateTime<Utc>) -> String {
  at.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP-date (or any RFC 2822 date).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc2822(value.trim())
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

/// A full response: status, ordered headers (repeats preserved), body and the
/// url it was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn new(url: impl Into<String>, status: u16) -> Self {
    Self {
      url: url.into(),
      status,
      status_text: String::new(),
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
    self.status_text = status_text.into();
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Whether the status is 2xx.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First value of a header, matched case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn has_header(&self, name: &str) -> bool {
    self.header(name).is_some()
  }

  /// When the origin produced this response, from its `date` header.
  pub fn date(&self) -> Option<DateTime<Utc>> {
    self.header("date").and_then(parse_http_date)
  }

  pub fn etag(&self) -> Option<&str> {
    self.header("etag")
  }

  /// `max-age` from `Cache-Control`, in seconds.
  pub fn max_age(&self) -> Option<u64> {
    let header = self.header("cache-control")?;

    header.split(',').find_map(|directive| {
      let value = directive.trim().strip_prefix("max-age=")?;
      let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
      digits.parse().ok()
    })
  }

  pub fn text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }

  pub fn to_document(&self) -> StoredDocument {
    StoredDocument {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      text: self.text().into_owned(),
      url: self.url.clone(),
    }
  }
}

impl From<StoredDocument> for CachedResponse {
  fn from(doc: StoredDocument) -> Self {
    Self {
      url: doc.url,
      status: doc.status,
      status_text: doc.status_text,
      headers: doc.headers,
      body: doc.text.into_bytes(),
    }
  }
}

/// Serialized form used by the key/value fallback store:
/// `{status, statusText, headers: [[name, value], ...], text, url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub text: String,
  pub url: String,
}
