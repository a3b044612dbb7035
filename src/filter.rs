//! Operator-facing filter state and its two wire projections: the REST page
//! query and the canonical live-subscription query.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::model::{Opportunity, OpportunityStatus};
use crate::utils::{fmt_num, parse_ts_rfc3339};

/// Minimum profit used for the "Profitable" shortcut: anything above zero.
pub const PROFITABLE_EPSILON_USD: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFilter {
    #[default]
    All,
    Chain(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    All,
    #[default]
    Profitable,
    Status(OpportunityStatus),
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::All => f.write_str("all"),
            StatusFilter::Profitable => f.write_str("Profitable"),
            StatusFilter::Status(s) => f.write_str(s.as_api_str()),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        if t.eq_ignore_ascii_case("profitable") {
            return Ok(StatusFilter::Profitable);
        }
        t.parse::<OpportunityStatus>()
            .map(StatusFilter::Status)
            .map_err(|_| FilterError::UnknownStatus(t.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    #[error("{field} is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },
    #[error("{field} is not a timestamp (epoch seconds or RFC 3339): {value:?}")]
    NotATimestamp { field: &'static str, value: String },
    #[error("unknown status filter: {0}")]
    UnknownStatus(String),
    #[error("network must be \"all\" or a chain id: {0:?}")]
    BadNetwork(String),
    #[error("page size must be between 1 and 1000 (got {0})")]
    BadPageSize(u32),
}

/// Canonical subscription query for the live stream. Two filters that agree on
/// the subscription subset produce byte-identical values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SubscriptionQuery(pub(crate) String);

impl SubscriptionQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends the query to a stream endpoint.
    pub fn url_for(&self, base: &str) -> String {
        if self.0.is_empty() {
            base.to_string()
        } else if base.contains('?') {
            format!("{base}&{}", self.0)
        } else {
            format!("{base}?{}", self.0)
        }
    }
}

impl fmt::Display for SubscriptionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The query predicate behind the opportunities table. Immutable once built;
/// every operator action produces a fresh value.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub network: NetworkFilter,
    pub status: StatusFilter,
    pub profit_min: Option<f64>,
    pub profit_max: Option<f64>,
    pub estimate_profit_min: Option<f64>,
    pub estimate_profit_max: Option<f64>,
    /// Epoch seconds, inclusive.
    pub created_from: Option<i64>,
    /// Epoch seconds, inclusive.
    pub created_to: Option<i64>,
    /// 1-based, as the API counts.
    pub page: u32,
    pub page_size: u32,
}

impl FilterState {
    pub fn new(status: StatusFilter, page_size: u32) -> Self {
        Self {
            network: NetworkFilter::All,
            status,
            profit_min: None,
            profit_max: None,
            estimate_profit_min: None,
            estimate_profit_max: None,
            created_from: None,
            created_to: None,
            page: 1,
            page_size: page_size.max(1),
        }
    }

    /// The "Clear" action: default status, no ranges, first page.
    pub fn cleared(default_status: StatusFilter, page_size: u32) -> Self {
        Self::new(default_status, page_size)
    }

    pub fn with_page(&self, page: u32) -> Self {
        Self { page: page.max(1), ..self.clone() }
    }

    pub fn with_page_size(&self, page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            ..self.clone()
        }
    }

    /// Subscription-subset pairs in their fixed canonical order.
    fn subscription_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<(&'static str, String)> = Vec::new();
        if let NetworkFilter::Chain(id) = self.network {
            pairs.push(("network_id", id.to_string()));
        }
        if let StatusFilter::Status(s) = self.status {
            pairs.push(("status", s.as_api_str().to_string()));
        }
        if let Some(min) = self.effective_profit_min() {
            pairs.push(("min_profit_usd", fmt_num(min)));
        }
        if let Some(max) = self.profit_max {
            pairs.push(("max_profit_usd", fmt_num(max)));
        }
        if let Some(min) = self.estimate_profit_min {
            pairs.push(("min_estimate_profit_usd", fmt_num(min)));
        }
        if let Some(max) = self.estimate_profit_max {
            pairs.push(("max_estimate_profit_usd", fmt_num(max)));
        }
        pairs
    }

    /// An explicit minimum wins over the "Profitable" epsilon.
    fn effective_profit_min(&self) -> Option<f64> {
        match (self.profit_min, self.status) {
            (Some(min), _) => Some(min),
            (None, StatusFilter::Profitable) => Some(PROFITABLE_EPSILON_USD),
            _ => None,
        }
    }

    pub fn subscription_query(&self) -> SubscriptionQuery {
        SubscriptionQuery(encode(&self.subscription_pairs()))
    }

    /// Full REST query: pagination, subscription subset, then the time window.
    pub fn page_query(&self) -> String {
        let mut pairs = vec![("page", self.page.to_string()), ("limit", self.page_size.to_string())];
        pairs.extend(self.subscription_pairs());
        if let Some(from) = self.created_from {
            pairs.push(("min_created_at", from.to_string()));
        }
        if let Some(to) = self.created_to {
            pairs.push(("max_created_at", to.to_string()));
        }
        encode(&pairs)
    }

    /// Whether a pushed opportunity satisfies the subscription-subset
    /// predicates. The time window is not checked; pushes are always fresh.
    pub fn admits(&self, opp: &Opportunity) -> bool {
        if let NetworkFilter::Chain(id) = self.network {
            if opp.network_id != id {
                return false;
            }
        }
        if let StatusFilter::Status(s) = self.status {
            if opp.status != s {
                return false;
            }
        }
        in_range(opp.profit_usd, self.effective_profit_min(), self.profit_max)
            && in_range(opp.estimate_profit_usd, self.estimate_profit_min, self.estimate_profit_max)
    }
}

fn in_range(v: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = v else {
        return false;
    };
    min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
}

fn encode(pairs: &[(&'static str, String)]) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

/// Raw filter form as typed by the operator. Empty strings mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterForm {
    pub network: String,
    pub status: String,
    pub profit_min: String,
    pub profit_max: String,
    pub estimate_profit_min: String,
    pub estimate_profit_max: String,
    pub timestamp_from: String,
    pub timestamp_to: String,
}

impl FilterForm {
    /// Validates the form locally; nothing reaches the network on error.
    /// The result starts at page 1.
    pub fn parse(&self, page_size: u32) -> Result<FilterState, FilterError> {
        let network = match self.network.trim() {
            "" => NetworkFilter::All,
            t if t.eq_ignore_ascii_case("all") => NetworkFilter::All,
            t => NetworkFilter::Chain(t.parse::<u64>().map_err(|_| FilterError::BadNetwork(t.to_string()))?),
        };
        Ok(FilterState {
            network,
            status: self.status.parse()?,
            profit_min: parse_num("profit_min", &self.profit_min)?,
            profit_max: parse_num("profit_max", &self.profit_max)?,
            estimate_profit_min: parse_num("estimate_profit_min", &self.estimate_profit_min)?,
            estimate_profit_max: parse_num("estimate_profit_max", &self.estimate_profit_max)?,
            created_from: parse_time("timestamp_from", &self.timestamp_from)?,
            created_to: parse_time("timestamp_to", &self.timestamp_to)?,
            page: 1,
            page_size: page_size.max(1),
        })
    }

    pub fn from_state(f: &FilterState) -> Self {
        let opt = |v: Option<f64>| v.map(fmt_num).unwrap_or_default();
        Self {
            network: match f.network {
                NetworkFilter::All => "all".to_string(),
                NetworkFilter::Chain(id) => id.to_string(),
            },
            status: f.status.to_string(),
            profit_min: opt(f.profit_min),
            profit_max: opt(f.profit_max),
            estimate_profit_min: opt(f.estimate_profit_min),
            estimate_profit_max: opt(f.estimate_profit_max),
            timestamp_from: f.created_from.map(|t| t.to_string()).unwrap_or_default(),
            timestamp_to: f.created_to.map(|t| t.to_string()).unwrap_or_default(),
        }
    }
}

fn parse_num(field: &'static str, raw: &str) -> Result<Option<f64>, FilterError> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(FilterError::NotANumber {
            field,
            value: t.to_string(),
        }),
    }
}

fn parse_time(field: &'static str, raw: &str) -> Result<Option<i64>, FilterError> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    if let Ok(secs) = t.parse::<i64>() {
        return Ok(Some(secs));
    }
    parse_ts_rfc3339(t)
        .map(|ts| Some(ts.floor() as i64))
        .ok_or_else(|| FilterError::NotATimestamp {
            field,
            value: t.to_string(),
        })
}
