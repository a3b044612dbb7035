use std::str::FromStr;

use chrono::{Duration as ChronoDuration, Utc};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::api_client::FetchError;
use crate::filter::FilterState;
use crate::model::{Network, Opportunity, OpportunityPage, OpportunityStatus, PaginationInfo};

/// Pagination total advertised for fabricated pages.
pub const SYNTHETIC_TOTAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    SurfaceError,
    Synthetic,
}

impl FromStr for FallbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" | "surface" | "surface_error" => Ok(FallbackMode::SurfaceError),
            "synthetic" | "demo" | "dummy" => Ok(FallbackMode::Synthetic),
            other => Err(format!("FETCH_FALLBACK must be error|synthetic (got {other})")),
        }
    }
}

/// Decides what the table shows when a page load fails.
pub trait FetchFallback: Send {
    /// `None` keeps the previous working set; `Some` replaces it with a
    /// page that must be marked synthetic.
    fn on_page_error(&mut self, filter: &FilterState, err: &FetchError, networks: &[Network]) -> Option<OpportunityPage>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SurfaceError;

impl FetchFallback for SurfaceError {
    fn on_page_error(&mut self, _filter: &FilterState, _err: &FetchError, _networks: &[Network]) -> Option<OpportunityPage> {
        None
    }
}

/// Demo/offline mode: fills the current page with plausible random rows.
pub struct SyntheticData {
    rng: SmallRng,
}

impl SyntheticData {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn opportunity(&mut self, chain_ids: &[u64]) -> Opportunity {
        const STATUSES: [OpportunityStatus; 5] = [
            OpportunityStatus::Succeeded,
            OpportunityStatus::PartiallySucceeded,
            OpportunityStatus::Reverted,
            OpportunityStatus::Error,
            OpportunityStatus::Skipped,
        ];
        let rng = &mut self.rng;
        let network_id = chain_ids[rng.random_range(0..chain_ids.len())];
        let status = STATUSES[rng.random_range(0..STATUSES.len())];
        let profit = rng
            .random_bool(0.85)
            .then(|| round2(rng.random::<f64>() * 2000.0 - 200.0));
        let gas = rng.random_bool(0.9).then(|| round2(rng.random::<f64>() * 50.0 + 1.0));
        // Estimate sits near the realised profit; the normal keeps most within +/-20%.
        let ratio = Normal::<f64>::new(1.0, 0.1)
            .map(|n| n.sample(rng))
            .unwrap_or(1.0)
            .clamp(0.8, 1.2);
        let estimate = profit.filter(|p| *p != 0.0).map(|p| round2(p * ratio));
        let age = ChronoDuration::days(rng.random_range(0..30)) + ChronoDuration::milliseconds(rng.random_range(0..86_400_000));
        let created = (Utc::now() - age).to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let id = Uuid::new_v4().simple().to_string()[..24].to_string();
        let token: String = (0..40)
            .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
            .collect();

        Opportunity {
            source_tx: Some(format!("0x{id}")),
            id: Some(id),
            network_id,
            status,
            profit_usd: profit,
            gas_usd: gas,
            estimate_profit_usd: estimate,
            created_at: JsonValue::String(created),
            source_block_number: Some(rng.random_range(1_000_000u64..2_000_000)),
            execute_block_number: None,
            profit_token: Some(format!("0x{token}")),
            profit_token_name: Some("Demo Token".to_string()),
            profit_token_symbol: Some("DEMO".to_string()),
            profit_token_decimals: Some(18),
            simulation_time: None,
            error: None,
            extra: Default::default(),
        }
    }
}

impl Default for SyntheticData {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchFallback for SyntheticData {
    fn on_page_error(&mut self, filter: &FilterState, err: &FetchError, networks: &[Network]) -> Option<OpportunityPage> {
        let mut chain_ids: Vec<u64> = networks.iter().map(|n| n.chain_id).collect();
        if chain_ids.is_empty() {
            chain_ids = crate::networks::builtin().iter().map(|n| n.chain_id).collect();
        }
        log::warn!(
            "feed.fallback.synthetic page={} limit={} cause={}",
            filter.page,
            filter.page_size,
            err
        );
        let opportunities = (0..filter.page_size).map(|_| self.opportunity(&chain_ids)).collect();
        Some(OpportunityPage {
            opportunities,
            pagination: Some(PaginationInfo::for_total(filter.page, filter.page_size, SYNTHETIC_TOTAL)),
        })
    }
}

pub fn from_mode(mode: FallbackMode) -> Box<dyn FetchFallback> {
    match mode {
        FallbackMode::SurfaceError => Box::new(SurfaceError),
        FallbackMode::Synthetic => Box::new(SyntheticData::new()),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::StatusFilter;

    #[test]
    fn test_surface_error_keeps_rows() {
        let f = FilterState::new(StatusFilter::Profitable, 20);
        assert!(SurfaceError.on_page_error(&f, &FetchError::Unavailable, &[]).is_none());
    }

    #[test]
    fn test_synthetic_page_shape() {
        let f = FilterState::new(StatusFilter::All, 25).with_page(3);
        let nets = vec![Network::named(10, "Optimism", None)];
        let page = SyntheticData::with_seed(7)
            .on_page_error(&f, &FetchError::Transport("refused".into()), &nets)
            .unwrap();
        assert_eq!(page.opportunities.len(), 25);
        assert!(page.opportunities.iter().all(|o| o.network_id == 10));
        assert!(page.opportunities.iter().all(|o| o.id.as_deref().map(str::len) == Some(24)));
        let p = page.pagination.unwrap();
        assert_eq!(p.total, SYNTHETIC_TOTAL);
        assert_eq!(p.total_pages, 40);
        assert_eq!(p.page, 3);
        assert!(p.has_prev && p.has_next);
    }

    #[test]
    fn test_synthetic_estimates_stay_near_profit() {
        let f = FilterState::new(StatusFilter::All, 200);
        let page = SyntheticData::with_seed(11)
            .on_page_error(&f, &FetchError::Unavailable, &[])
            .unwrap();
        let pairs: Vec<(f64, f64)> = page
            .opportunities
            .iter()
            .filter_map(|o| Some((o.profit_usd?, o.estimate_profit_usd?)))
            .collect();
        assert!(!pairs.is_empty());
        for (profit, estimate) in pairs {
            assert_eq!(profit.signum(), estimate.signum());
            assert!(estimate.abs() <= profit.abs() * 1.2 + 0.01, "{estimate} vs {profit}");
            assert!(estimate.abs() >= profit.abs() * 0.8 - 0.01, "{estimate} vs {profit}");
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Synthetic".parse::<FallbackMode>(), Ok(FallbackMode::Synthetic));
        assert_eq!("error".parse::<FallbackMode>(), Ok(FallbackMode::SurfaceError));
        assert!("maybe".parse::<FallbackMode>().is_err());
    }
}
