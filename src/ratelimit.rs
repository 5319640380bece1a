use ahash::AHashMap;
use serde_json::Value;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Everything unparseable cools down for an hour; nothing cools down for
/// more than a day.
const DEFAULT_DELAY_MS: u64 = 60 * 60 * 1000;
const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Coarse model group used for quota keying. An account rate-limited for
/// one claude model is limited for all of them.
pub fn family_for_model(model: &str) -> &str {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("claude") {
        "claude"
    } else if lower.contains("flash") {
        "gemini-flash"
    } else if lower.contains("gemini") {
        "gemini-pro"
    } else {
        // Uncommon models key on themselves.
        model
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    reset_at: Instant,
    pub model: Option<String>,
    pub message: Option<String>,
}

/// In-process registry of (account, family) cooldowns.
///
/// Entries expire lazily on read; there is no background sweeper because
/// the map is bounded by (accounts x families).
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    inner: RwLock<AHashMap<(i64, String), RateLimitEntry>>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_rate_limited(
        &self,
        account_id: i64,
        family: &str,
        retry_after_ms: u64,
        model: Option<String>,
        message: Option<String>,
    ) {
        let delay = retry_after_ms.min(MAX_DELAY_MS);
        debug!(
            account_id,
            family,
            delay_ms = delay,
            "Account marked rate-limited"
        );

        let entry = RateLimitEntry {
            reset_at: Instant::now() + Duration::from_millis(delay),
            model,
            message,
        };
        self.inner
            .write()
            .expect("rate limit registry poisoned")
            .insert((account_id, family.to_string()), entry);
    }

    /// Read-and-expire: returns the live entry, evicting it once elapsed.
    pub fn is_rate_limited(&self, account_id: i64, family: &str) -> Option<RateLimitEntry> {
        let key = (account_id, family.to_string());
        let now = Instant::now();

        {
            let map = self.inner.read().expect("rate limit registry poisoned");
            match map.get(&key) {
                Some(entry) if entry.reset_at > now => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.inner
            .write()
            .expect("rate limit registry poisoned")
            .remove(&key);
        None
    }

    /// Minimum wait across a set of accounts: zero when any account is free
    /// for this family, otherwise the earliest reset.
    pub fn min_wait_ms(&self, account_ids: &[i64], family: &str) -> u64 {
        let now = Instant::now();
        let map = self.inner.read().expect("rate limit registry poisoned");

        let mut min_wait: Option<u64> = None;
        for id in account_ids {
            match map.get(&(*id, family.to_string())) {
                Some(entry) if entry.reset_at > now => {
                    let wait = entry.reset_at.duration_since(now).as_millis() as u64;
                    min_wait = Some(min_wait.map_or(wait, |current| current.min(wait)));
                }
                _ => return 0,
            }
        }
        min_wait.unwrap_or(0)
    }
}

/// Parsed upstream 429 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub retry_after_ms: u64,
    pub model: Option<String>,
    pub message: Option<String>,
}

/// Extract a cooldown from a Google-style 429 body.
///
/// Looks for `error.details[]` entries carrying either
/// `ErrorInfo.metadata.quotaResetDelay` or `RetryInfo.retryDelay`, both in
/// the `128h12m18.724039275s` duration grammar. Unparseable bodies fall
/// back to one hour.
pub fn parse_rate_limit_error(body: &Value) -> RateLimitInfo {
    let error = body.get("error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let details = error
        .and_then(|e| e.get("details"))
        .and_then(Value::as_array);

    let mut model = None;
    let mut delay_ms = None;

    for detail in details.into_iter().flatten() {
        let type_name = detail.get("@type").and_then(Value::as_str).unwrap_or("");

        if type_name.contains("ErrorInfo") {
            if let Some(metadata) = detail.get("metadata") {
                if model.is_none() {
                    model = metadata
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                if delay_ms.is_none() {
                    delay_ms = metadata
                        .get("quotaResetDelay")
                        .and_then(Value::as_str)
                        .and_then(parse_duration_ms);
                }
            }
        } else if type_name.contains("RetryInfo") && delay_ms.is_none() {
            delay_ms = detail
                .get("retryDelay")
                .and_then(Value::as_str)
                .and_then(parse_duration_ms);
        }
    }

    RateLimitInfo {
        retry_after_ms: delay_ms.unwrap_or(DEFAULT_DELAY_MS).min(MAX_DELAY_MS),
        model,
        message,
    }
}

/// Cooldown from response headers: `retry-after-ms` wins over `retry-after`
/// (seconds); absent headers yield `None`. Capped at 24 h.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let from_ms = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let ms = from_ms.or_else(|| {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000))
    })?;

    Some(ms.min(MAX_DELAY_MS))
}

/// Parse a Go-style duration string (`128h12m18.724039275s`). Any subset of
/// the h/m/s components is accepted; seconds may be fractional.
fn parse_duration_ms(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms = 0u64;
    let mut number = String::new();
    let mut matched_any = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }

        let value: f64 = number.parse().ok()?;
        number.clear();

        let unit_ms = match ch {
            'h' => 3_600_000.0,
            'm' => 60_000.0,
            's' => 1_000.0,
            _ => return None,
        };

        total_ms += (value * unit_ms) as u64;
        matched_any = true;
    }

    // Trailing digits without a unit make the whole string invalid.
    if !number.is_empty() || !matched_any {
        return None;
    }
    Some(total_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quota_reset_delay_literal_from_upstream() {
        let body = json!({
            "error": {
                "details": [
                    {"@type": "ErrorInfo", "metadata": {"quotaResetDelay": "128h12m18.724039275s"}}
                ]
            }
        });

        let info = parse_rate_limit_error(&body);
        assert_eq!(info.retry_after_ms, 461_538_724);
    }

    #[test]
    fn retry_info_retry_delay_is_accepted() {
        let body = json!({
            "error": {
                "message": "slow down",
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "30s"}
                ]
            }
        });

        let info = parse_rate_limit_error(&body);
        assert_eq!(info.retry_after_ms, 30_000);
        assert_eq!(info.message.as_deref(), Some("slow down"));
    }

    #[test]
    fn unparseable_body_defaults_to_one_hour() {
        let info = parse_rate_limit_error(&json!({"error": {"message": "nope"}}));
        assert_eq!(info.retry_after_ms, DEFAULT_DELAY_MS);
    }

    #[test]
    fn delays_cap_at_24_hours() {
        let body = json!({
            "error": {
                "details": [{"@type": "ErrorInfo", "metadata": {"quotaResetDelay": "900h"}}]
            }
        });
        assert_eq!(parse_rate_limit_error(&body).retry_after_ms, MAX_DELAY_MS);
    }

    #[test]
    fn duration_grammar_accepts_partial_components() {
        assert_eq!(parse_duration_ms("5s"), Some(5_000));
        assert_eq!(parse_duration_ms("2m"), Some(120_000));
        assert_eq!(parse_duration_ms("1h30m"), Some(5_400_000));
        assert_eq!(parse_duration_ms("0.5s"), Some(500));
        assert_eq!(parse_duration_ms(""), None);
        assert_eq!(parse_duration_ms("12"), None);
        assert_eq!(parse_duration_ms("5x"), None);
    }

    #[test]
    fn retry_after_ms_header_wins() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "60".parse().unwrap());
        headers.insert("retry-after-ms", "1500".parse().unwrap());
        assert_eq!(parse_retry_after_ms(&headers), Some(1_500));
    }

    #[test]
    fn retry_after_seconds_is_scaled() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "60".parse().unwrap());
        assert_eq!(parse_retry_after_ms(&headers), Some(60_000));
    }

    #[test]
    fn absent_headers_yield_none() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn header_value_caps_at_24_hours() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "9999999".parse().unwrap());
        assert_eq!(parse_retry_after_ms(&headers), Some(MAX_DELAY_MS));
    }

    #[test]
    fn registry_marks_reads_and_expires() {
        let registry = RateLimitRegistry::new();
        registry.mark_rate_limited(1, "claude", 50, None, None);

        assert!(registry.is_rate_limited(1, "claude").is_some());
        assert!(registry.is_rate_limited(1, "gemini-pro").is_none());

        std::thread::sleep(Duration::from_millis(60));
        assert!(registry.is_rate_limited(1, "claude").is_none());
    }

    #[test]
    fn min_wait_is_zero_when_any_account_is_free() {
        let registry = RateLimitRegistry::new();
        registry.mark_rate_limited(1, "claude", 10_000, None, None);

        assert_eq!(registry.min_wait_ms(&[1, 2], "claude"), 0);
        assert!(registry.min_wait_ms(&[1], "claude") > 0);
    }

    #[test]
    fn min_wait_picks_the_earliest_reset() {
        let registry = RateLimitRegistry::new();
        registry.mark_rate_limited(1, "claude", 10_000, None, None);
        registry.mark_rate_limited(2, "claude", 3_000, None, None);

        let wait = registry.min_wait_ms(&[1, 2], "claude");
        assert!(wait > 0 && wait <= 3_000);
    }

    #[test]
    fn family_mapping() {
        assert_eq!(family_for_model("claude-sonnet-4-5"), "claude");
        assert_eq!(family_for_model("gemini-2.5-flash"), "gemini-flash");
        assert_eq!(family_for_model("gemini-3-pro"), "gemini-pro");
        assert_eq!(family_for_model("gpt-5-codex"), "gpt-5-codex");
    }
}
