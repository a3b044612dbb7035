//! REST side of the feed: opportunity pages and the network list.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::filter::FilterState;
use crate::model::{Network, Opportunity, OpportunityPage, PaginationInfo};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("service unavailable")]
    Unavailable,
    #[error("API error: {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short machine-readable tag for logs and the UI banner.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unavailable => "unavailable",
            FetchError::Status(_) => "status",
            FetchError::Transport(_) => "transport",
            FetchError::Decode(_) => "decode",
        }
    }

    pub fn banner(&self) -> String {
        match self {
            FetchError::Unavailable => {
                "Opportunities service unavailable (503). Showing the last loaded data.".to_string()
            }
            FetchError::Status(code) => format!("API error: {code}"),
            FetchError::Transport(_) => "Network error while loading opportunities.".to_string(),
            FetchError::Decode(_) => "Opportunities API returned an unreadable response.".to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            status_error(status)
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

fn status_error(status: StatusCode) -> FetchError {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        FetchError::Unavailable
    } else {
        FetchError::Status(status.as_u16())
    }
}

/// Where pages and networks come from. The controller only talks to this.
pub trait PageSource: Clone + Send + Sync + 'static {
    fn fetch_page(&self, filter: &FilterState) -> impl Future<Output = Result<OpportunityPage, FetchError>> + Send;

    fn fetch_networks(&self) -> impl Future<Output = Result<Vec<Network>, FetchError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("arbscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl PageSource for ApiClient {
    async fn fetch_page(&self, filter: &FilterState) -> Result<OpportunityPage, FetchError> {
        let url = format!("{}/opportunities?{}", self.base_url, filter.page_query());
        log::debug!("api.opportunities.get url={}", url);
        let body = self.get_json(&url).await?;
        let page = decode_page(body, filter)?;
        log::debug!(
            "api.opportunities.ok rows={} total={}",
            page.opportunities.len(),
            page.pagination.map(|p| p.total).unwrap_or(0)
        );
        Ok(page)
    }

    async fn fetch_networks(&self) -> Result<Vec<Network>, FetchError> {
        let url = format!("{}/networks", self.base_url);
        let body = self.get_json(&url).await?;
        decode_networks(body)
    }
}

/// Decodes an opportunities response row by row; a malformed row is logged
/// and skipped rather than failing the whole page. A missing pagination
/// block is reconstructed from the request.
pub fn decode_page(body: JsonValue, filter: &FilterState) -> Result<OpportunityPage, FetchError> {
    let JsonValue::Object(mut obj) = body else {
        return Err(FetchError::Decode("expected a JSON object".to_string()));
    };

    let rows = match obj.remove("opportunities") {
        Some(JsonValue::Array(rows)) => rows,
        Some(JsonValue::Null) | None => Vec::new(),
        Some(_) => return Err(FetchError::Decode("`opportunities` is not an array".to_string())),
    };

    let mut opportunities = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        match serde_json::from_value::<Opportunity>(row) {
            Ok(o) => opportunities.push(o),
            Err(e) => log::warn!("api.opportunities.row_skipped index={} err={}", i, e),
        }
    }

    let pagination = match obj.remove("pagination") {
        Some(JsonValue::Null) | None => None,
        Some(v) => match serde_json::from_value::<PaginationInfo>(v) {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!("api.opportunities.pagination_invalid err={}", e);
                None
            }
        },
    }
    .or_else(|| {
        Some(PaginationInfo::for_total(
            filter.page,
            filter.page_size,
            (filter.page.saturating_sub(1) as u64) * filter.page_size as u64 + opportunities.len() as u64,
        ))
    });

    Ok(OpportunityPage {
        opportunities,
        pagination,
    })
}

/// Accepts either a bare array or `{ "networks": [...] }`.
pub fn decode_networks(body: JsonValue) -> Result<Vec<Network>, FetchError> {
    let list = match body {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut obj) => match obj.remove("networks") {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(FetchError::Decode("expected `networks` array".to_string())),
        },
        _ => return Err(FetchError::Decode("expected a JSON array".to_string())),
    };
    let mut out = Vec::with_capacity(list.len());
    for item in list {
        match serde_json::from_value::<Network>(item) {
            Ok(n) => out.push(n),
            Err(e) => log::warn!("api.networks.row_skipped err={}", e),
        }
    }
    Ok(out)
}
