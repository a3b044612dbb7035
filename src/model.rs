use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::utils::created_at_secs;

/// Execution outcome reported by the upstream system of record.
///
/// The API speaks snake_case, older builds emitted the PascalCase enum names;
/// both decode. Anything unrecognised lands on `NoStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    #[serde(alias = "Succeeded")]
    Succeeded,
    #[serde(alias = "PartiallySucceeded")]
    PartiallySucceeded,
    #[serde(alias = "Reverted")]
    Reverted,
    #[serde(alias = "Error")]
    Error,
    #[serde(alias = "Skipped")]
    Skipped,
    #[default]
    #[serde(rename = "none", alias = "None", other)]
    NoStatus,
}

impl OpportunityStatus {
    /// Query-string form understood by the opportunities API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            OpportunityStatus::Succeeded => "succeeded",
            OpportunityStatus::PartiallySucceeded => "partially_succeeded",
            OpportunityStatus::Reverted => "reverted",
            OpportunityStatus::Error => "error",
            OpportunityStatus::Skipped => "skipped",
            OpportunityStatus::NoStatus => "none",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OpportunityStatus::Succeeded => "Success",
            OpportunityStatus::PartiallySucceeded => "Partial",
            OpportunityStatus::Reverted => "Reverted",
            OpportunityStatus::Error => "Error",
            OpportunityStatus::Skipped => "Skipped",
            OpportunityStatus::NoStatus => "None",
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

impl FromStr for OpportunityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s.trim().chars().filter(|c| *c != '_').collect::<String>().to_lowercase();
        match norm.as_str() {
            "succeeded" => Ok(OpportunityStatus::Succeeded),
            "partiallysucceeded" => Ok(OpportunityStatus::PartiallySucceeded),
            "reverted" => Ok(OpportunityStatus::Reverted),
            "error" => Ok(OpportunityStatus::Error),
            "skipped" => Ok(OpportunityStatus::Skipped),
            "none" => Ok(OpportunityStatus::NoStatus),
            _ => Err(format!("unknown opportunity status: {s}")),
        }
    }
}

/// One detected arbitrage event, as reported by the opportunities API.
///
/// Fields the dashboard does not interpret are kept in `extra` so a partial
/// live update can be merged field-by-field without losing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub network_id: u64,
    #[serde(default)]
    pub status: OpportunityStatus,
    #[serde(default)]
    pub profit_usd: Option<f64>,
    #[serde(default)]
    pub gas_usd: Option<f64>,
    #[serde(default)]
    pub estimate_profit_usd: Option<f64>,
    #[serde(default)]
    pub created_at: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_token_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_token_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_token_decimals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Opportunity {
    /// Working-set identity: `id`, or `"{network_id}-{created_at}"` for legacy rows.
    pub fn key(&self) -> String {
        match self.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => synthetic_key(self.network_id, &self.created_at),
        }
    }

    /// `created_at` normalized to epoch seconds.
    pub fn created_ts(&self) -> Option<f64> {
        created_at_secs(&self.created_at)
    }

    /// Shallow merge: every field present in `patch` overwrites ours, the rest stay.
    pub fn merged_with(&self, patch: &Map<String, JsonValue>) -> Result<Opportunity, serde_json::Error> {
        let mut base = match serde_json::to_value(self)? {
            JsonValue::Object(m) => m,
            _ => Map::new(),
        };
        for (k, v) in patch {
            base.insert(k.clone(), v.clone());
        }
        serde_json::from_value(JsonValue::Object(base))
    }
}

fn synthetic_key(network_id: u64, created_at: &JsonValue) -> String {
    match created_at {
        JsonValue::String(s) => format!("{network_id}-{s}"),
        JsonValue::Null => format!("{network_id}-"),
        other => format!("{network_id}-{other}"),
    }
}

/// Derives the working-set key from a raw object without requiring it to be a
/// complete opportunity (partial updates usually carry only `id`).
pub fn key_of(fields: &Map<String, JsonValue>) -> Option<String> {
    if let Some(id) = fields.get("id").and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    let network_id = fields.get("network_id").and_then(|v| v.as_u64())?;
    let created_at = fields.get("created_at").cloned().unwrap_or(JsonValue::Null);
    Some(synthetic_key(network_id, &created_at))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_prev: bool,
}

impl PaginationInfo {
    pub fn for_total(page: u32, limit: u32, total: u64) -> Self {
        let limit = limit.max(1);
        let total_pages = (total.div_ceil(limit as u64)).max(1) as u32;
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// Response body of `GET /opportunities`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityPage {
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(default)]
    pub pagination: Option<PaginationInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub block_explorer: Option<String>,
    #[serde(default)]
    pub total_profit_usd: Option<f64>,
    #[serde(default)]
    pub total_gas_usd: Option<f64>,
    #[serde(default)]
    pub executed_opportunities: Option<u64>,
    #[serde(default)]
    pub success_rate: Option<f64>,
}

impl Network {
    pub fn named(chain_id: u64, name: &str, block_explorer: Option<&str>) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            block_explorer: block_explorer.map(|s| s.to_string()),
            total_profit_usd: None,
            total_gas_usd: None,
            executed_opportunities: None,
            success_rate: None,
        }
    }
}
