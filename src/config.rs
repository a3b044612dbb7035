use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

use crate::fallback::FallbackMode;
use crate::feed::DEFAULT_WORKING_SET_CAP;
use crate::filter::StatusFilter;
use crate::highlight::DEFAULT_HIGHLIGHT_WINDOW;
use crate::live::ReconnectPolicy;
use crate::pagination::MAX_PAGE_SIZE;

/// Where settings come from. Production reads the process environment;
/// tests pass a map.
type Source<'a> = &'a dyn Fn(&str) -> Option<String>;

fn get_env(src: Source, key: &str) -> Option<String> {
    src(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn get_env_bool(src: Source, key: &str, default: bool) -> bool {
    match get_env(src, key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_f64(src: Source, key: &str, default: f64) -> Result<f64> {
    match get_env(src, key) {
        None => Ok(default),
        Some(v) => Ok(v.parse::<f64>().map_err(|e| anyhow!("{key} invalid float: {e}"))?),
    }
}

fn get_env_u64(src: Source, key: &str, default: u64) -> Result<u64> {
    match get_env(src, key) {
        None => Ok(default),
        Some(v) => Ok(v.parse::<u64>().map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_u32(src: Source, key: &str, default: u32) -> Result<u32> {
    let v = get_env_u64(src, key, u64::from(default))?;
    u32::try_from(v).map_err(|_| anyhow!("{key} out of range: {v}"))
}

fn get_env_u16(src: Source, key: &str, default: u16) -> Result<u16> {
    let v = get_env_u64(src, key, u64::from(default))?;
    u16::try_from(v).map_err(|_| anyhow!("{key} out of range: {v}"))
}

fn get_env_string(src: Source, key: &str, default: &str) -> String {
    get_env(src, key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Settings {
    // Upstream
    pub api_base_url: String,
    pub live_ws_url: String,
    pub http_timeout_secs: u64,

    // Feed
    pub default_page_size: u32,
    pub working_set_cap: usize,
    pub highlight_ms: u64,
    pub default_status: StatusFilter,
    pub fetch_fallback: FallbackMode,
    pub refresh_secs: u64,

    // Live stream
    pub realtime_enabled: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_multiplier: f64,
    pub live_handshake_secs: u64,
    /// 0 disables the idle check.
    pub live_idle_secs: u64,

    // Dashboard
    pub dashboard_host: String,
    pub dashboard_port: u16,
    pub dashboard_open_browser: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_source(&|k| env::var(k).ok())
    }

    pub fn from_source(src: Source) -> Result<Self> {
        let default_status = get_env_string(src, "DEFAULT_STATUS_FILTER", "Profitable")
            .parse::<StatusFilter>()
            .map_err(|e| anyhow!("DEFAULT_STATUS_FILTER: {e}"))?;
        let fetch_fallback = get_env_string(src, "FETCH_FALLBACK", "error")
            .parse::<FallbackMode>()
            .map_err(|e| anyhow!(e))?;

        let s = Self {
            api_base_url: get_env_string(src, "EXTERNAL_API_BASE_URL", "http://localhost:8081/api/v1"),
            live_ws_url: get_env_string(src, "LIVE_WS_URL", "ws://localhost:8081/api/v1/ws/opportunities"),
            http_timeout_secs: get_env_u64(src, "HTTP_TIMEOUT_SECS", 10)?,
            default_page_size: get_env_u32(src, "DEFAULT_PAGE_SIZE", 20)?,
            working_set_cap: usize::try_from(get_env_u64(src, "WORKING_SET_CAP", DEFAULT_WORKING_SET_CAP as u64)?)
                .map_err(|_| anyhow!("WORKING_SET_CAP out of range"))?,
            highlight_ms: get_env_u64(src, "HIGHLIGHT_MS", DEFAULT_HIGHLIGHT_WINDOW.as_millis() as u64)?,
            default_status,
            fetch_fallback,
            refresh_secs: get_env_u64(src, "REFRESH_SECS", 0)?,
            realtime_enabled: get_env_bool(src, "REALTIME_ENABLED", false),
            reconnect_base_ms: get_env_u64(src, "RECONNECT_BASE_MS", 3000)?,
            reconnect_max_ms: get_env_u64(src, "RECONNECT_MAX_MS", 30_000)?,
            reconnect_multiplier: get_env_f64(src, "RECONNECT_MULTIPLIER", 2.0)?,
            live_handshake_secs: get_env_u64(src, "LIVE_HANDSHAKE_SECS", 10)?,
            live_idle_secs: get_env_u64(src, "LIVE_IDLE_SECS", 60)?,
            dashboard_host: get_env_string(src, "DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: get_env_u16(src, "DASHBOARD_PORT", 8080)?,
            dashboard_open_browser: get_env_bool(src, "DASHBOARD_OPEN_BROWSER", false),
        };

        s.validate()?;
        Ok(s)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn highlight_window(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_secs > 0).then(|| Duration::from_secs(self.refresh_secs))
    }

    pub fn live_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.live_handshake_secs)
    }

    pub fn live_idle_timeout(&self) -> Option<Duration> {
        (self.live_idle_secs > 0).then(|| Duration::from_secs(self.live_idle_secs))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
            multiplier: self.reconnect_multiplier,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base_url).map_err(|e| anyhow!("EXTERNAL_API_BASE_URL invalid: {e}"))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(anyhow!("EXTERNAL_API_BASE_URL must be http(s) (got {})", self.api_base_url));
        }
        let ws = Url::parse(&self.live_ws_url).map_err(|e| anyhow!("LIVE_WS_URL invalid: {e}"))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(anyhow!("LIVE_WS_URL must be ws(s) (got {})", self.live_ws_url));
        }
        if self.http_timeout_secs < 1 {
            return Err(anyhow!("HTTP_TIMEOUT_SECS must be >= 1 (got {})", self.http_timeout_secs));
        }
        if self.live_handshake_secs < 1 {
            return Err(anyhow!("LIVE_HANDSHAKE_SECS must be >= 1 (got {})", self.live_handshake_secs));
        }
        if self.default_page_size < 1 || self.default_page_size > MAX_PAGE_SIZE {
            return Err(anyhow!(
                "DEFAULT_PAGE_SIZE must be within 1..={MAX_PAGE_SIZE} (got {})",
                self.default_page_size
            ));
        }
        if self.working_set_cap < 1 {
            return Err(anyhow!("WORKING_SET_CAP must be >= 1 (got {})", self.working_set_cap));
        }
        if self.highlight_ms < 1 {
            return Err(anyhow!("HIGHLIGHT_MS must be >= 1 (got {})", self.highlight_ms));
        }
        if self.reconnect_base_ms < 1 {
            return Err(anyhow!("RECONNECT_BASE_MS must be >= 1 (got {})", self.reconnect_base_ms));
        }
        if self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(anyhow!(
                "RECONNECT_MAX_MS must be >= RECONNECT_BASE_MS (max={} base={})",
                self.reconnect_max_ms,
                self.reconnect_base_ms
            ));
        }
        if !self.reconnect_multiplier.is_finite() || self.reconnect_multiplier < 1.0 {
            return Err(anyhow!(
                "RECONNECT_MULTIPLIER must be >= 1 (got {})",
                self.reconnect_multiplier
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_source(&|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = load(&[]).unwrap();
        assert_eq!(s.api_base_url, "http://localhost:8081/api/v1");
        assert_eq!(s.default_page_size, 20);
        assert_eq!(s.working_set_cap, 500);
        assert_eq!(s.default_status, StatusFilter::Profitable);
        assert_eq!(s.fetch_fallback, FallbackMode::SurfaceError);
        assert!(!s.realtime_enabled);
        assert_eq!(s.refresh_interval(), None);
        assert_eq!(s.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(s.highlight_window(), Duration::from_secs(3));
        assert_eq!(s.live_handshake_timeout(), Duration::from_secs(10));
        assert_eq!(s.live_idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let s = load(&[
            ("REALTIME_ENABLED", "yes"),
            ("FETCH_FALLBACK", "synthetic"),
            ("DEFAULT_STATUS_FILTER", "all"),
            ("REFRESH_SECS", "15"),
            ("DASHBOARD_PORT", "  "),
            ("LIVE_IDLE_SECS", "0"),
        ])
        .unwrap();
        assert!(s.realtime_enabled);
        assert_eq!(s.fetch_fallback, FallbackMode::Synthetic);
        assert_eq!(s.default_status, StatusFilter::All);
        assert_eq!(s.refresh_interval(), Some(Duration::from_secs(15)));
        assert_eq!(s.dashboard_port, 8080);
        assert_eq!(s.live_idle_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(load(&[("DEFAULT_PAGE_SIZE", "0")]).is_err());
        assert!(load(&[("DEFAULT_PAGE_SIZE", "5000")]).is_err());
        assert!(load(&[("LIVE_WS_URL", "http://nope")]).is_err());
        assert!(load(&[("RECONNECT_MULTIPLIER", "0.5")]).is_err());
        assert!(load(&[("RECONNECT_MAX_MS", "100")]).is_err());
        assert!(load(&[("HTTP_TIMEOUT_SECS", "ten")]).is_err());
        assert!(load(&[("DEFAULT_STATUS_FILTER", "winning")]).is_err());
    }

    #[test]
    fn test_out_of_range_integers_are_rejected() {
        let err = load(&[("DASHBOARD_PORT", "70000")]).unwrap_err();
        assert!(err.to_string().contains("DASHBOARD_PORT"));
        let err = load(&[("DEFAULT_PAGE_SIZE", "4294967316")]).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_PAGE_SIZE"));
        assert_eq!(load(&[("DASHBOARD_PORT", "65535")]).unwrap().dashboard_port, 65535);
    }
}
