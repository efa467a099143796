//! Remote work cancellation
//!
//! Tells the faucet to drop the in-flight proof-of-work before the miner is
//! terminated. Best effort: every failure is swallowed.

use std::time::Duration;

use url::Url;

const CANCEL_TIMEOUT: Duration = Duration::from_secs(3);

/// `<endpoint>/cancel_pow`, or `None` for an unusable endpoint
pub fn cancel_url(api_url: &str) -> Option<Url> {
    let base = api_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Url::parse(&format!("{}/cancel_pow", base)).ok()
}

/// POST the cancellation; the response is ignored
pub async fn notify_cancel(client: &reqwest::Client, api_url: &str, credential: &str) {
    let credential = credential.trim();
    if credential.is_empty() {
        return;
    }
    let Some(url) = cancel_url(api_url) else {
        tracing::debug!("Skipping cancel_pow: unusable endpoint {:?}", api_url);
        return;
    };

    match client
        .post(url)
        .bearer_auth(credential)
        .timeout(CANCEL_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => tracing::debug!("cancel_pow returned {}", response.status()),
        Err(e) => tracing::debug!("cancel_pow failed: {}", e),
    }
}
