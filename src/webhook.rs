//! Outgoing webhook notifications for board changes.

use futures::future;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::Configuration;

/// Posts change notifications to the configured webhook URLs.
///
/// Construction performs no I/O; deliveries happen on detached tasks and
/// failures are logged, never surfaced to the caller.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    update_urls: Vec<String>,
}

impl Client {
    pub fn new(config: &Configuration) -> Self {
        Self {
            http: reqwest::Client::new(),
            update_urls: config.webhook_update.clone(),
        }
    }

    /// Fire-and-forget notification of an updated entity.
    pub fn notify_update(&self, payload: Value) {
        if self.update_urls.is_empty() {
            return;
        }
        let deliveries = self
            .update_urls
            .iter()
            .map(|url| {
                let http = self.http.clone();
                let url = url.clone();
                let payload = payload.clone();
                async move {
                    match http.post(&url).json(&payload).send().await {
                        Ok(response) => {
                            debug!(url = %url, status = %response.status(), "Webhook delivered");
                        }
                        Err(e) => {
                            error!(url = %url, "Webhook delivery failed: {e}");
                        }
                    }
                }
            })
            .collect::<Vec<_>>();
        tokio::spawn(async move {
            future::join_all(deliveries).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn no_configured_urls_means_no_work() {
        let client = Client::new(&Configuration::default());
        // must not panic or spawn anything that outlives the test
        client.notify_update(json!({"action": "update", "block_id": "b1"}));
    }
}
