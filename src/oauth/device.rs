use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::OauthError;

const MAX_CONSECUTIVE_TRANSPORT_ERRORS: u32 = 3;
const SLOW_DOWN_EXTRA_SECS: u64 = 5;

/// Device-endpoint initiation response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,

    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    900
}

/// One poll step, as classified by the provider-specific poller.
#[derive(Debug, Clone)]
pub enum DevicePollOutcome {
    /// User has not acted yet; keep polling at the agreed interval.
    Pending,
    /// Server asked us to back off; widen the interval.
    SlowDown,
    /// Authorization granted; the payload is provider-specific.
    Authorized(Value),
    Denied,
    Expired,
    TransportError(String),
}

/// Drive a device-code flow to completion.
///
/// `poll_once` performs one poll request and classifies the response; the
/// loop owns pacing, the deadline, and transport-error tolerance. Pacing
/// never drops below the server-announced interval.
pub async fn poll_device_flow<F, Fut>(
    authorization: &DeviceAuthorization,
    mut poll_once: F,
) -> Result<Value, OauthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DevicePollOutcome>,
{
    let mut interval = Duration::from_secs(authorization.interval.max(1));
    let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
    let mut transport_errors: u32 = 0;

    loop {
        if Instant::now() >= deadline {
            return Err(OauthError::DeviceExpired);
        }

        match poll_once().await {
            DevicePollOutcome::Authorized(payload) => {
                debug!("Device authorization granted");
                return Ok(payload);
            }
            DevicePollOutcome::Pending => {
                transport_errors = 0;
            }
            DevicePollOutcome::SlowDown => {
                transport_errors = 0;
                interval += Duration::from_secs(SLOW_DOWN_EXTRA_SECS);
                debug!(interval_secs = interval.as_secs(), "Device poll slow_down");
            }
            DevicePollOutcome::Denied => return Err(OauthError::DeviceDenied),
            DevicePollOutcome::Expired => return Err(OauthError::DeviceExpired),
            DevicePollOutcome::TransportError(message) => {
                transport_errors += 1;
                warn!(
                    attempt = transport_errors,
                    error = %message,
                    "Device poll transport error"
                );
                if transport_errors >= MAX_CONSECUTIVE_TRANSPORT_ERRORS {
                    return Err(OauthError::Other {
                        message: format!("device poll failed repeatedly: {message}"),
                    });
                }
            }
        }

        sleep(interval).await;
    }
}

/// Classify a standard OAuth device-token poll response
/// (`authorization_pending` / `slow_down` / `access_denied` /
/// `expired_token`). Providers with bespoke shapes layer their own rules
/// before falling back to this.
pub(crate) fn classify_standard_poll(status: u16, body: &Value) -> DevicePollOutcome {
    let error = body.get("error").and_then(Value::as_str);

    match error {
        Some("authorization_pending") => DevicePollOutcome::Pending,
        Some("slow_down") => DevicePollOutcome::SlowDown,
        Some("access_denied") => DevicePollOutcome::Denied,
        Some("expired_token") => DevicePollOutcome::Expired,
        Some(other) => DevicePollOutcome::TransportError(format!(
            "device poll error {other} (status {status})"
        )),
        None if (200..300).contains(&status) => DevicePollOutcome::Authorized(body.clone()),
        None => DevicePollOutcome::TransportError(format!("device poll status {status}")),
    }
}
