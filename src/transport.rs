//! Transport collaborator: turns a request description into a JSON payload.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use url::Url;

use crate::error::{CacheError, Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    })
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// What to send. The path is relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
  pub method: Method,
  pub path: String,
  /// Query string parameters, in order.
  pub params: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl TransportRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      path: path.into(),
      params: Vec::new(),
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method: Method::Post,
      path: path.into(),
      params: Vec::new(),
      body,
    }
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Put,
      path: path.into(),
      params: Vec::new(),
      body: Some(body),
    }
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self {
      method: Method::Delete,
      path: path.into(),
      params: Vec::new(),
      body: None,
    }
  }

  /// Send the scalar members of `params` (a JSON object) as query
  /// parameters. Arrays repeat the key once per element; nulls are dropped.
  pub fn with_params(mut self, params: &Value) -> Self {
    if let Value::Object(map) = params {
      for (key, value) in map {
        match value {
          Value::Array(items) => {
            for item in items {
              push_param(&mut self.params, key, item);
            }
          }
          other => push_param(&mut self.params, key, other),
        }
      }
    }
    self
  }
}

fn push_param(params: &mut Vec<(String, String)>, key: &str, value: &Value) {
  let value = match value {
    Value::Null => return,
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  params.push((key.to_string(), value));
}

impl fmt::Display for TransportRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.path)?;
    for (i, (key, value)) in self.params.iter().enumerate() {
      write!(f, "{}{}={}", if i == 0 { '?' } else { '&' }, key, value)?;
    }
    Ok(())
  }
}

/// Executes requests. Retrying is the implementation's business; the cache
/// never retries.
pub trait Transport: Send + Sync {
  fn execute(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>>;
}

/// HTTP transport over reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  /// Create a transport for `base_url`, optionally sending an API key in
  /// `key_header` with every request.
  pub fn new(base_url: &str, api_key: Option<(&str, &str)>) -> Result<Self> {
    let mut base_url = Url::parse(base_url)
      .map_err(|e| CacheError::invalid_argument(format!("bad API url {}: {}", base_url, e)))?;
    if base_url.cannot_be_a_base() {
      return Err(CacheError::invalid_argument(format!("bad API url {}", base_url)));
    }
    // request paths are joined below the base path
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let mut headers = HeaderMap::new();
    if let Some((key_header, key)) = api_key {
      let name = HeaderName::from_bytes(key_header.as_bytes())
        .map_err(|e| CacheError::invalid_argument(format!("bad header {}: {}", key_header, e)))?;
      let mut value = HeaderValue::from_str(key)
        .map_err(|e| CacheError::invalid_argument(format!("bad API key: {}", e)))?;
      value.set_sensitive(true);
      headers.insert(name, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| CacheError::invalid_argument(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::new(format!("bad request path {}: {}", path, e)))
  }
}

impl Transport for HttpTransport {
  fn execute(&self, request: TransportRequest) -> BoxFuture<'static, Result<Value, TransportError>> {
    let client = self.client.clone();
    let url = self.url_for(&request.path);

    async move {
      let url = url?;
      let mut builder = client.request(request.method.into(), url);
      if !request.params.is_empty() {
        builder = builder.query(&request.params);
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| TransportError::new(e.to_string()))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
          status.to_string()
        } else {
          format!("{}: {}", status, body)
        };
        return Err(TransportError::with_status(reason, status.as_u16()));
      }

      let bytes = response
        .bytes()
        .await
        .map_err(|e| TransportError::with_status(e.to_string(), status.as_u16()))?;
      if bytes.is_empty() {
        // 204s and friends
        return Ok(Value::Null);
      }
      serde_json::from_slice(&bytes)
        .map_err(|e| TransportError::with_status(format!("invalid JSON: {}", e), status.as_u16()))
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_url_for_joins_relative_paths() {
    let transport = HttpTransport::new("https://metabase.example.com/", None).unwrap();
    assert_eq!(
      transport.url_for("/api/table/7").unwrap().as_str(),
      "https://metabase.example.com/api/table/7"
    );
  }

  #[test]
  fn test_url_for_keeps_base_subpath() {
    for base in ["https://example.com/metabase", "https://example.com/metabase/"] {
      let transport = HttpTransport::new(base, None).unwrap();
      assert_eq!(
        transport.url_for("/api/table").unwrap().as_str(),
        "https://example.com/metabase/api/table"
      );
    }
  }

  #[test]
  fn test_new_rejects_bad_input() {
    assert!(matches!(
      HttpTransport::new("not a url", None),
      Err(CacheError::InvalidArgument(_))
    ));
    assert!(HttpTransport::new("https://example.com", Some(("bad header", "k"))).is_err());
    assert!(HttpTransport::new("https://example.com", Some(("x-api-key", "k"))).is_ok());
  }

  #[test]
  fn test_params_from_args() {
    let request = TransportRequest::get("/api/table/7/query_metadata").with_params(&serde_json::json!({
      "include_sensitive_fields": true,
      "tags": ["a", "b"],
      "skip": null,
      "name": "orders"
    }));
    // serde_json maps iterate in key order
    assert_eq!(
      request.params,
      vec![
        ("include_sensitive_fields".to_string(), "true".to_string()),
        ("name".to_string(), "orders".to_string()),
        ("tags".to_string(), "a".to_string()),
        ("tags".to_string(), "b".to_string()),
      ]
    );
    assert_eq!(
      request.to_string(),
      "GET /api/table/7/query_metadata?include_sensitive_fields=true&name=orders&tags=a&tags=b"
    );
  }

  #[test]
  fn test_request_display() {
    assert_eq!(TransportRequest::get("/api/table").to_string(), "GET /api/table");
    assert_eq!(
      TransportRequest::put("/api/table/7", serde_json::json!({})).method,
      Method::Put
    );
  }
}
