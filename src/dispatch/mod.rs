mod context;

pub use context::{RequestContext, strip_provider_prefix};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::DbActorHandle;
use crate::error::ProxyError;
use crate::providers::{Account, Provider, ProviderRegistry, ProviderResponse};
use crate::ratelimit::{RateLimitRegistry, family_for_model};
use crate::secrets::CredentialCipher;
use switchboard_schema::openai::ChatCompletionRequest;

/// Exponential backoff between transient retries is capped at one hour.
const BACKOFF_CAP_MS: u64 = 60 * 60 * 1000;

/// Routes one authenticated request to a healthy upstream account.
///
/// Selection is least-recently-used within (user, provider), with accounts
/// rate-limited for the model family filtered out up front. Failover walks
/// the remaining accounts; only RateLimited and UpstreamTransient failures
/// move on to the next one.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    db: DbActorHandle,
    cipher: Arc<dyn CredentialCipher>,
    limits: Arc<RateLimitRegistry>,
    retry_max_times: usize,
    retry_base_ms: u64,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        db: DbActorHandle,
        cipher: Arc<dyn CredentialCipher>,
        limits: Arc<RateLimitRegistry>,
        retry_max_times: usize,
        retry_base_ms: u64,
    ) -> Self {
        Self {
            registry,
            db,
            cipher,
            limits,
            retry_max_times,
            retry_base_ms,
        }
    }

    pub fn limits(&self) -> &Arc<RateLimitRegistry> {
        &self.limits
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        user_id: &str,
        request: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let ctx = RequestContext::from_request(request);
        let (forced_provider, _) = strip_provider_prefix(&request.model);

        let providers: Vec<Arc<dyn Provider>> = match forced_provider {
            Some(name) => self.registry.get(name).into_iter().collect(),
            None => self.registry.providers_for_model(&ctx.bare_model),
        };

        if providers.is_empty() {
            return Err(ProxyError::InvalidRequest(format!(
                "no provider serves model '{}'",
                request.model
            )));
        }

        let family = family_for_model(&ctx.bare_model).to_string();
        let mut all_account_ids: Vec<i64> = Vec::new();
        let mut attempt: usize = 0;
        let mut last_err: Option<ProxyError> = None;

        for provider in &providers {
            let rows = self
                .db
                .list_active_accounts(user_id, provider.config().name)
                .await?;

            for row in rows {
                let account_id = row.id;
                all_account_ids.push(account_id);

                if self.limits.is_rate_limited(account_id, &family).is_some() {
                    continue;
                }

                let mut account = match Account::from_db(row, self.cipher.as_ref()) {
                    Ok(account) => account,
                    Err(e) => {
                        warn!(account_id, error = %e, "Skipping undecryptable account");
                        continue;
                    }
                };

                attempt += 1;
                if attempt > self.retry_max_times + 1 {
                    break;
                }

                let ctx = if attempt == 1 { ctx.clone() } else { ctx.next_attempt() };

                match self
                    .try_account(provider.as_ref(), &mut account, &ctx, request)
                    .await
                {
                    Ok(response) => {
                        let _ = self.db.touch_account_used(account_id).await;
                        info!(
                            provider = provider.config().name,
                            account_id,
                            model = %ctx.bare_model,
                            attempt,
                            "Request dispatched"
                        );
                        return Ok(response);
                    }

                    Err(ProxyError::RateLimited {
                        retry_after_ms,
                        message,
                    }) => {
                        self.limits.mark_rate_limited(
                            account_id,
                            &family,
                            retry_after_ms,
                            Some(ctx.bare_model.clone()),
                            message.clone(),
                        );
                        warn!(
                            provider = provider.config().name,
                            account_id,
                            retry_after_ms,
                            "Account rate limited upstream; failing over"
                        );
                        last_err = Some(ProxyError::RateLimited {
                            retry_after_ms,
                            message,
                        });
                    }

                    Err(err @ (ProxyError::UpstreamTransient(_) | ProxyError::Reqwest(_))) => {
                        let backoff = backoff_ms(self.retry_base_ms, attempt);
                        warn!(
                            provider = provider.config().name,
                            account_id,
                            backoff_ms = backoff,
                            error = %err,
                            "Transient upstream failure; retrying on next account"
                        );
                        last_err = Some(err);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }

                    // 4xx-class failures are final: retrying them elsewhere
                    // would just replay a bad request.
                    Err(err) => return Err(err),
                }
            }
        }

        // A 429 seen upstream is surfaced as 429; never having had an
        // account to try is the internal 503.
        match last_err {
            Some(err) => Err(err),
            None => Err(ProxyError::QuotaExhausted {
                retry_after_ms: self.limits.min_wait_ms(&all_account_ids, &family).max(1_000),
            }),
        }
    }

    async fn try_account(
        &self,
        provider: &dyn Provider,
        account: &mut Account,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let credential = provider.valid_credentials(account).await?;

        let mut body = request.clone();
        provider.prepare_request(account, &mut body).await?;

        provider.make_request(&credential, account, ctx, &body).await
    }

}

/// `base * 2^(attempt-1)`, capped at one hour.
fn backoff_ms(base: u64, attempt: usize) -> u64 {
    let exp = attempt.saturating_sub(1).min(20) as u32;
    base.saturating_mul(1u64 << exp).min(BACKOFF_CAP_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1_000);
        assert_eq!(backoff_ms(500, 3), 2_000);
        assert_eq!(backoff_ms(500, 40), BACKOFF_CAP_MS);
        assert_eq!(backoff_ms(0, 5), 0);
    }
}
