//! HTTP client for the upstream movement provider.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use docket_core::{Cnj, Movement, MovementType, Provider, ProviderError, mark_current};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Provider`] backed by a JSON-over-HTTP endpoint.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct WireMovement {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    movement_type: Option<String>,
    #[serde(alias = "raw_text", alias = "description")]
    text: String,
    date: DateTime<Utc>,
    #[serde(default)]
    tribunal: Option<String>,
    #[serde(default)]
    grade: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBody {
    List(Vec<WireMovement>),
    Wrapped { movements: Vec<WireMovement> },
}

impl WireMovement {
    fn into_movement(self, index: usize) -> Movement {
        let id = self.id.unwrap_or_else(|| format!("{}-{index}", self.date.timestamp()));
        let mut movement = Movement::from_text(id, self.text, self.date);
        if let Some(t) = self.movement_type.as_deref().and_then(MovementType::parse) {
            movement.movement_type = t;
            movement.icon = None;
            movement.color = None;
            movement = movement.with_presentation();
        }
        movement.tribunal = self.tribunal;
        movement.grade = self.grade;
        movement
    }
}

impl HttpProvider {
    /// `base_url` like `https://provider.example/api`; a trailing slash is dropped.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_movements(&self, cnj: &Cnj, limit: usize) -> Result<Vec<Movement>, ProviderError> {
        let url = format!("{}/processes/{}/movements?limit={limit}", self.base_url, cnj);
        debug!(url = %url, "fetching movements from provider");
        let resp = self.get(&url).send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            info!(cnj = %cnj, "provider has no record of process");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        let mut movements = parse_movements(&body)?;
        movements.truncate(limit);
        info!(cnj = %cnj, count = movements.len(), "fetched movements");
        Ok(movements)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/health", self.base_url);
        let resp = self.get(&url).send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = retry_after_secs(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, retry_after, &body))
    }
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited { retry_after_secs }
    } else {
        ProviderError::Unavailable(format!("server returned {}: {body}", status.as_u16()))
    }
}

/// Accepts a bare array or `{"movements": [...]}`. Result is newest first.
fn parse_movements(body: &str) -> Result<Vec<Movement>, ProviderError> {
    let wire: WireBody =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    let wire = match wire {
        WireBody::List(list) => list,
        WireBody::Wrapped { movements } => movements,
    };
    let mut movements: Vec<Movement> = wire
        .into_iter()
        .enumerate()
        .map(|(i, w)| w.into_movement(i))
        .collect();
    mark_current(&mut movements);
    Ok(movements)
}
