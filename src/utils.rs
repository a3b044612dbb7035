use chrono::DateTime;
use serde_json::Value as JsonValue;
use tokio::time::{Instant, Interval};

pub fn now_ts() -> f64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs_f64()
}

pub fn clamp_u32(x: u32, lo: u32, hi: u32) -> u32 {
    x.max(lo).min(hi.max(lo))
}

/// Parses an RFC 3339 timestamp into epoch seconds.
pub fn parse_ts_rfc3339(s: &str) -> Option<f64> {
    let dt = DateTime::parse_from_rfc3339(s.trim()).ok()?;
    Some(dt.timestamp_millis() as f64 / 1000.0)
}

/// Normalizes the `created_at` shapes the upstream API has been seen to emit
/// (RFC 3339 strings, epoch seconds, epoch millis) into epoch seconds.
pub fn created_at_secs(v: &JsonValue) -> Option<f64> {
    match v {
        JsonValue::String(s) => parse_ts_rfc3339(s).or_else(|| s.trim().parse::<f64>().ok().map(epoch_secs)),
        JsonValue::Number(n) => n.as_f64().map(epoch_secs),
        _ => None,
    }
}

fn epoch_secs(raw: f64) -> f64 {
    // Millisecond timestamps are three orders of magnitude past any plausible seconds value.
    if raw > 100_000_000_000.0 {
        raw / 1000.0
    } else {
        raw
    }
}

/// Shortest round-trip formatting, so equal values always encode identically.
/// `-0.0 + 0.0` is `+0.0`, which folds the two zeros together.
pub fn fmt_num(x: f64) -> String {
    format!("{}", x + 0.0)
}

/// Sleeps until `at`, or forever when there is no deadline.
pub async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Next tick of an optional interval; never fires when absent.
pub async fn tick(iv: &mut Option<Interval>) {
    match iv {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_created_at_shapes() {
        assert_eq!(created_at_secs(&json!("2024-05-01T00:00:00Z")), Some(1_714_521_600.0));
        assert_eq!(created_at_secs(&json!("2024-05-01T00:00:00.500+00:00")), Some(1_714_521_600.5));
        assert_eq!(created_at_secs(&json!(1_714_521_600)), Some(1_714_521_600.0));
        assert_eq!(created_at_secs(&json!(1_714_521_600_000u64)), Some(1_714_521_600.0));
        assert_eq!(created_at_secs(&json!("yesterday")), None);
        assert_eq!(created_at_secs(&JsonValue::Null), None);
    }

    #[test]
    fn test_fmt_num_is_canonical() {
        assert_eq!(fmt_num(5.0), "5");
        assert_eq!(fmt_num(0.001), "0.001");
        assert_eq!(fmt_num(-3.5), "-3.5");
        assert_eq!(fmt_num(-0.0), "0");
        assert_eq!(fmt_num(-0.0), fmt_num(0.0));
    }

    #[test]
    fn test_clamp_u32() {
        assert_eq!(clamp_u32(0, 1, 10), 1);
        assert_eq!(clamp_u32(99, 1, 10), 10);
        assert_eq!(clamp_u32(5, 1, 0), 1);
    }
}
