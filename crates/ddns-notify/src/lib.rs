// # Webhook Notifier
//
// POSTs `{"domain": "<fqdn>", "ip": "<address>"}` to a configured URL
// whenever a reconciler changes a record.
//
// Delivery is best effort: failures are logged at warn and otherwise
// dropped. Nothing is retried or queued.

use async_trait::async_trait;
use ddns_core::config::WebhookConfig;
use ddns_core::traits::Notifier;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

/// Upper bound on a single delivery
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChangePayload<'a> {
    domain: &'a str,
    ip: String,
}

/// Notifier that POSTs JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Create a notifier from the `webhook` config section
    pub fn from_config(client: reqwest::Client, config: &WebhookConfig) -> Self {
        Self::new(client, config.url.as_str())
    }

    async fn deliver(&self, hostname: &str, ip: IpAddr) -> Result<(), String> {
        let payload = ChangePayload {
            domain: hostname,
            ip: ip.to_string(),
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(DELIVERY_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, hostname: &str, ip: IpAddr) {
        match self.deliver(hostname, ip).await {
            Ok(()) => tracing::debug!("Webhook notified: {} -> {}", hostname, ip),
            Err(e) => tracing::warn!("Webhook notification for {} failed: {}", hostname, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn posts_domain_and_ip() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .header("content-type", "application/json")
                    .json_body(json!({ "domain": "www.example.com", "ip": "203.0.113.9" }));
                then.status(204);
            })
            .await;

        let notifier = WebhookNotifier::new(reqwest::Client::new(), server.url("/hook"));
        notifier
            .send("www.example.com", "203.0.113.9".parse().unwrap())
            .await;

        hook.assert_async().await;
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(500);
            })
            .await;

        let notifier = WebhookNotifier::from_config(
            reqwest::Client::new(),
            &WebhookConfig {
                url: server.url("/hook"),
            },
        );
        notifier
            .send("example.com", "2001:db8::1".parse().unwrap())
            .await;

        hook.assert_async().await;
        assert!(
            notifier
                .deliver("example.com", "2001:db8::1".parse().unwrap())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_does_not_panic() {
        let notifier = WebhookNotifier::new(reqwest::Client::new(), "http://127.0.0.1:9/hook");
        notifier
            .send("example.com", "198.51.100.4".parse().unwrap())
            .await;
    }
}
