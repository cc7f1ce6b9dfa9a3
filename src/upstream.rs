//! HTTP clients for the tracking platform and the remote optimizer.
//!
//! Both clients share one pooled `reqwest::Client` each, send Basic auth
//! where configured and retry briefly on 429. Response payloads are folded
//! into [`Position`] by [`normalize_positions`] before leaving this module.

use std::time::Duration;

use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::normalize::normalize_positions;
use crate::service::{OptimizationBackend, PositionQuery, PositionSource, PositionsResponse, TimeWindow};
use crate::{Position, Result, ServiceConfig, TrajectoryError};

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const POOL_IDLE_PER_HOST: usize = 8;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
        .timeout(timeout)
        .build()
        .map_err(|e| TrajectoryError::config(format!("failed to create HTTP client: {}", e)))
}

fn basic_auth(user: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}

/// GET `url` and decode the JSON body, retrying on 429.
async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    auth: Option<&str>,
    query: &[(&str, String)],
    timeout: Duration,
) -> Result<T> {
    let request_error = |e: reqwest::Error| TrajectoryError::from_reqwest(e, timeout);
    let mut retries = 0;

    loop {
        let mut request = client.get(url).header(ACCEPT, "application/json").query(query);
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }

        let resp = request.send().await.map_err(request_error)?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RETRIES {
            retries += 1;
            let backoff = RETRY_BACKOFF * retries;
            warn!("[upstream] 429 from {}, retry {} after {:?}", url, retries, backoff);
            tokio::time::sleep(backoff).await;
            continue;
        }

        if !status.is_success() {
            return Err(TrajectoryError::http(
                format!("GET {} returned {}", url, status),
                Some(status.as_u16()),
            ));
        }

        return resp.json::<T>().await.map_err(request_error);
    }
}

// ============================================================================
// Tracking platform
// ============================================================================

/// Client for the tracking platform's route report and positions endpoints.
pub struct TrackingApiClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    timeout: Duration,
}

impl TrackingApiClient {
    /// `base_url` without trailing slash. Credentials are optional; without
    /// them requests go out unauthenticated.
    pub fn new(
        base_url: &str,
        user: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let auth_header = match (user, password) {
            (Some(user), Some(password)) => Some(basic_auth(user, password)),
            (Some(user), None) => Some(basic_auth(user, "")),
            _ => None,
        };

        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
            timeout,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(
            &config.tracking_api_url,
            config.tracking_api_user.as_deref(),
            config.tracking_api_password.as_deref(),
            config.upstream_timeout,
        )
    }

    async fn fetch(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Position>> {
        let url = format!("{}{}", self.base_url, path);
        let payload: serde_json::Value =
            get_json(&self.client, &url, self.auth_header.as_deref(), query, self.timeout).await?;
        let positions = normalize_positions(&payload);
        debug!("[TrackingApiClient] {} -> {} positions", path, positions.len());
        Ok(positions)
    }
}

impl PositionSource for TrackingApiClient {
    fn route_report<'a>(
        &'a self,
        device_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, Result<Vec<Position>>> {
        async move {
            let query = [
                ("deviceId", device_id.to_string()),
                ("from", window.from_rfc3339()),
                ("to", window.to_rfc3339()),
            ];
            self.fetch("/api/reports/route", &query).await
        }
        .boxed()
    }

    fn current_positions<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<Vec<Position>>> {
        async move {
            let query = [("deviceId", device_id.to_string())];
            self.fetch("/api/positions", &query).await
        }
        .boxed()
    }
}

// ============================================================================
// Remote optimizer
// ============================================================================

/// Client for a remote instance of this service's position API.
pub struct RemoteOptimizerClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteOptimizerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

impl OptimizationBackend for RemoteOptimizerClient {
    fn optimize<'a>(&'a self, query: &'a PositionQuery) -> BoxFuture<'a, Result<PositionsResponse>> {
        async move {
            let path = if query.effective_window().is_some() {
                "/api/history"
            } else {
                "/api/positions"
            };
            let url = format!("{}{}", self.base_url, path);
            let response: PositionsResponse =
                get_json(&self.client, &url, None, &query.to_query_params(), self.timeout).await?;
            debug!(
                "[RemoteOptimizerClient] device {}: {} positions from remote",
                query.device_id,
                response.positions.len()
            );
            Ok(response)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth("admin", "admin"), "Basic YWRtaW46YWRtaW4=");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            TrackingApiClient::new("http://gps.local/", Some("u"), None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://gps.local");
        assert_eq!(client.auth_header.as_deref(), Some("Basic dTo="));

        let anonymous = TrackingApiClient::new("http://gps.local", None, None, Duration::from_secs(1)).unwrap();
        assert!(anonymous.auth_header.is_none());
    }

    #[tokio::test]
    async fn test_timeout_reports_configured_limit() {
        // Accepts connections at the socket level but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TrackingApiClient::new(&format!("http://{}", addr), None, None, Duration::from_millis(200))
            .unwrap();
        let err = client.current_positions("7").await.unwrap_err();

        match err {
            TrajectoryError::Timeout { operation, timeout_ms } => {
                assert_eq!(timeout_ms, 200);
                assert_eq!(operation, "GET /api/positions");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        drop(listener);
    }
}
