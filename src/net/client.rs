//! REST client for the travel-safety backend.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use url::Url;

use crate::config::Config;
use crate::queue::AlertPayload;

/// Body of `POST /sos`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SosRequest<'a> {
  latitude: f64,
  longitude: f64,
  message: &'a str,
  timestamp: DateTime<Utc>,
  is_offline: bool,
}

impl<'a> SosRequest<'a> {
  fn new(payload: &'a AlertPayload, is_offline: bool) -> Self {
    Self {
      latitude: payload.latitude,
      longitude: payload.longitude,
      message: payload.message_or_default(),
      timestamp: payload.timestamp,
      is_offline,
    }
  }
}

/// Backend client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  probe_path: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL '{}': {}", config.api.base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.api.request_timeout())
      .user_agent(concat!("safetrail/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::api_token(),
      probe_path: config.connectivity.probe_path.clone(),
    })
  }

  /// `path` under the API base, keeping the base's own path prefix.
  fn endpoint(&self, path: &str) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| eyre!("Invalid endpoint '{}': {}", joined, e))
  }

  fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Deliver an SOS. Any 2xx response counts as delivered.
  pub async fn send_alert(&self, payload: &AlertPayload, is_offline: bool) -> Result<()> {
    let url = self.endpoint("sos")?;
    let response = self
      .authorized(self.http.post(url))
      .json(&SosRequest::new(payload, is_offline))
      .send()
      .await
      .map_err(|e| eyre!("Failed to send SOS: {}", e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("SOS rejected by backend: HTTP {}", status));
    }
    Ok(())
  }

  /// Download a map tile. `url` is absolute; tiles usually live off-backend.
  pub async fn fetch_tile(&self, url: &str) -> Result<Vec<u8>> {
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch tile {}: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Tile {} returned HTTP {}", url, status));
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read tile {}: {}", url, e))?;
    Ok(bytes.to_vec())
  }

  /// Reachability probe; true on any 2xx.
  pub async fn ping(&self) -> bool {
    let Ok(url) = self.endpoint(&self.probe_path) else {
      return false;
    };
    match self.http.get(url).send().await {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        tracing::trace!(error = %e, "ping failed");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base_url: &str) -> ApiClient {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    ApiClient::new(&config).unwrap()
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let api = client("http://localhost:8080/api");
    assert_eq!(api.endpoint("sos").unwrap().as_str(), "http://localhost:8080/api/sos");
    assert_eq!(api.endpoint("/ping").unwrap().as_str(), "http://localhost:8080/api/ping");

    let api = client("http://localhost:8080/api/");
    assert_eq!(api.endpoint("sos").unwrap().as_str(), "http://localhost:8080/api/sos");
  }

  #[test]
  fn test_sos_request_shape() {
    let payload = AlertPayload::new(40.7128, -74.006, None);
    let body = serde_json::to_value(SosRequest::new(&payload, true)).unwrap();

    assert_eq!(body["latitude"], 40.7128);
    assert_eq!(body["longitude"], -74.006);
    assert_eq!(body["message"], "Emergency SOS request");
    assert_eq!(body["isOffline"], true);
    assert!(body["timestamp"].is_string());
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    let mut config = Config::default();
    config.api.base_url = "::nope::".to_string();
    assert!(ApiClient::new(&config).is_err());
  }
}
