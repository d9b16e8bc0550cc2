// apps/gateway/src/services/inventory_proxy.rs

//! Pass-through to the inventory (movies) service.
//!
//! Method, query string and raw body are forwarded as-is; headers minus
//! `Host` and hop-by-hop ones. The upstream status, headers and body are
//! relayed unchanged. No retry and no caching: an unreachable or slow
//! upstream is a 502.

use crate::errors::{AppError, Result};
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use std::time::Duration;
use tracing::{event, instrument, Level};

const HOP_BY_HOP: [&str; 8] = [
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn forward_request_header(name: &str) -> bool {
  !name.eq_ignore_ascii_case("host") && !name.eq_ignore_ascii_case("content-length") && !is_hop_by_hop(name)
}

fn relay_response_header(name: &str) -> bool {
  !name.eq_ignore_ascii_case("content-length") && !is_hop_by_hop(name)
}

/// `base[/tail][?query]`
pub fn upstream_url(base: &str, tail: &str, query: &str) -> String {
  let mut url = base.trim_end_matches('/').to_string();
  let tail = tail.trim_start_matches('/');
  if !tail.is_empty() {
    url.push('/');
    url.push_str(tail);
  }
  if !query.is_empty() {
    url.push('?');
    url.push_str(query);
  }
  url
}

pub struct InventoryProxy {
  client: reqwest::Client,
  base_url: String,
}

impl InventoryProxy {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| AppError::Internal(format!("Failed to build inventory HTTP client: {}", e)))?;
    Ok(Self {
      client,
      base_url: base_url.to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  #[instrument(name = "InventoryProxy::forward", skip(self, req, body), fields(method = %req.method(), target_url = tracing::field::Empty))]
  pub async fn forward(&self, req: &HttpRequest, tail: &str, body: Vec<u8>) -> Result<HttpResponse> {
    let url = upstream_url(&self.base_url, tail, req.query_string());
    tracing::Span::current().record("target_url", url.as_str());

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
      .map_err(|e| AppError::Internal(format!("Unsupported method: {}", e)))?;
    let mut builder = self.client.request(method, &url);
    for (name, value) in req.headers() {
      if forward_request_header(name.as_str()) {
        builder = builder.header(name.as_str(), value.as_bytes());
      }
    }
    if !body.is_empty() {
      builder = builder.body(body);
    }

    let upstream = builder.send().await.map_err(|e| {
      let kind = if e.is_timeout() {
        "timeout"
      } else if e.is_connect() {
        "connect"
      } else {
        "request"
      };
      event!(Level::WARN, error = %e, kind, "Inventory upstream call failed.");
      AppError::InventoryUnavailable(format!("{} error: {}", kind, e))
    })?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
      .map_err(|e| AppError::InventoryUnavailable(format!("Upstream sent an invalid status: {}", e)))?;
    let mut response = HttpResponse::build(status);
    for (name, value) in upstream.headers() {
      if relay_response_header(name.as_str()) {
        response.append_header((name.as_str(), value.as_bytes()));
      }
    }

    let payload = upstream.bytes().await.map_err(|e| {
      event!(Level::WARN, error = %e, "Failed to read inventory response body.");
      AppError::InventoryUnavailable(format!("body error: {}", e))
    })?;
    event!(Level::INFO, status = status.as_u16(), body_size = payload.len(), "Inventory request relayed.");
    Ok(response.body(payload.to_vec()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hop_by_hop_headers_are_recognised_case_insensitively() {
    assert!(is_hop_by_hop("Connection"));
    assert!(is_hop_by_hop("transfer-encoding"));
    assert!(!is_hop_by_hop("content-type"));

    assert!(!forward_request_header("Host"));
    assert!(forward_request_header("authorization"));
    assert!(!relay_response_header("Content-Length"));
    assert!(relay_response_header("set-cookie"));
  }

  #[test]
  fn upstream_url_joins_tail_and_query() {
    let base = "http://inventory:5000/api/movies";
    assert_eq!(upstream_url(base, "", ""), base);
    assert_eq!(upstream_url(base, "42", ""), "http://inventory:5000/api/movies/42");
    assert_eq!(
      upstream_url("http://inventory:5000/api/movies/", "/a/b", "title=x&y=1"),
      "http://inventory:5000/api/movies/a/b?title=x&y=1"
    );
  }
}
