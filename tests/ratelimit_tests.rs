use serde_json::json;

use switchboard::ratelimit::{
    RateLimitRegistry, family_for_model, parse_rate_limit_error, parse_retry_after_ms,
};

#[test]
fn quota_reset_delay_literal() {
    let body = json!({
        "error": {
            "details": [
                {"@type": "ErrorInfo", "metadata": {"quotaResetDelay": "128h12m18.724039275s"}}
            ]
        }
    });

    assert_eq!(parse_rate_limit_error(&body).retry_after_ms, 461_538_724);
}

#[test]
fn model_and_message_ride_along() {
    let body = json!({
        "error": {
            "message": "You have exhausted your capacity on this model.",
            "details": [
                {"@type": "type.googleapis.com/google.rpc.ErrorInfo",
                 "reason": "QUOTA_EXHAUSTED",
                 "metadata": {"model": "claude-sonnet-4-5", "quotaResetDelay": "30m"}}
            ]
        }
    });

    let info = parse_rate_limit_error(&body);
    assert_eq!(info.retry_after_ms, 30 * 60 * 1000);
    assert_eq!(info.model.as_deref(), Some("claude-sonnet-4-5"));
    assert!(info.message.as_deref().unwrap().contains("exhausted"));
}

#[test]
fn retry_after_header_preference_and_cap() {
    let mut headers = reqwest::header::HeaderMap::new();
    assert_eq!(parse_retry_after_ms(&headers), None);

    headers.insert("retry-after", "120".parse().unwrap());
    assert_eq!(parse_retry_after_ms(&headers), Some(120_000));

    headers.insert("retry-after-ms", "2500".parse().unwrap());
    assert_eq!(parse_retry_after_ms(&headers), Some(2_500));

    headers.insert("retry-after-ms", "999999999999".parse().unwrap());
    assert_eq!(parse_retry_after_ms(&headers), Some(24 * 60 * 60 * 1000));
}

#[test]
fn registry_filters_and_min_wait_drive_account_selection() {
    let registry = RateLimitRegistry::new();
    let family = family_for_model("claude-sonnet-4-5");
    assert_eq!(family, "claude");

    // Scenario: accounts 1 and 2, account 1 gets limited.
    registry.mark_rate_limited(1, family, 60_000, Some("claude-sonnet-4-5".into()), None);

    assert!(registry.is_rate_limited(1, family).is_some());
    assert!(registry.is_rate_limited(2, family).is_none());

    // A free account means zero wait; both limited means earliest reset.
    assert_eq!(registry.min_wait_ms(&[1, 2], family), 0);
    registry.mark_rate_limited(2, family, 30_000, None, None);
    let wait = registry.min_wait_ms(&[1, 2], family);
    assert!(wait > 0 && wait <= 30_000);

    // Another family is unaffected.
    assert!(registry.is_rate_limited(1, "gemini-pro").is_none());
}
