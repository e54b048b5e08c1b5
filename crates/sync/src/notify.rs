//! Failure notifications and the best-effort wrapper for non-critical work.

use std::{future::Future, time::Duration};

use {
    async_trait::async_trait,
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    types::{SyncConfiguration, SyncOutcome},
};

/// Receives notice of scheduled runs that did not succeed.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_failure(
        &self,
        configuration: &SyncConfiguration,
        outcome: &SyncOutcome,
    ) -> Result<()>;
}

/// Await `fut` and swallow its error after logging it.
///
/// Used for work whose failure must not be confused with a failed sync:
/// schedule timestamp refreshes, notification delivery and fallback logging.
pub async fn best_effort<T, F>(what: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "{what} failed (ignored)");
            None
        },
    }
}

/// Reports failures through the tracing log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify_failure(
        &self,
        configuration: &SyncConfiguration,
        outcome: &SyncOutcome,
    ) -> Result<()> {
        let errors = outcome.error_details().join("; ");
        warn!(
            configuration_id = configuration.id,
            configuration = %configuration.name,
            email = configuration.notification_email.as_deref().unwrap_or("-"),
            log_id = outcome.log_id,
            errors = %errors,
            "scheduled sync failed"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailurePayload<'a> {
    configuration_id: i64,
    configuration_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_email: Option<&'a str>,
    log_id: i64,
    errors: &'a [String],
}

const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts a JSON failure report to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// `timeout` bounds the whole request, response included.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("racefeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_failure(
        &self,
        configuration: &SyncConfiguration,
        outcome: &SyncOutcome,
    ) -> Result<()> {
        let payload = FailurePayload {
            configuration_id: configuration.id,
            configuration_name: &configuration.name,
            notification_email: configuration.notification_email.as_deref(),
            log_id: outcome.log_id,
            errors: outcome.error_details(),
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(Error::message(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        info!(
            configuration_id = configuration.id,
            log_id = outcome.log_id,
            "failure notification delivered"
        );
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{ConfigurationUpsert, SyncResult},
    };

    fn failed_outcome() -> SyncOutcome {
        SyncOutcome {
            success: false,
            log_id: 11,
            result: Some(SyncResult {
                success: false,
                errors: vec!["uci feed 503".into()],
                ..Default::default()
            }),
            error: None,
        }
    }

    #[tokio::test]
    async fn best_effort_passes_values_and_swallows_errors() {
        assert_eq!(best_effort("ok", async { Ok(3) }).await, Some(3));
        let swallowed: Option<()> =
            best_effort("boom", async { Err(Error::message("boom")) }).await;
        assert!(swallowed.is_none());
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let config = ConfigurationUpsert::named("nightly").create(1, 0);
        assert!(
            LogNotifier
                .notify_failure(&config, &failed_outcome())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn webhook_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/sync")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "configurationName": "nightly",
                "notificationEmail": "ops@example.com",
                "logId": 11,
                "errors": ["uci feed 503"]
            })))
            .with_status(204)
            .create_async()
            .await;

        let mut config = ConfigurationUpsert::named("nightly").create(1, 0);
        config.notification_email = Some("ops@example.com".into());
        let notifier = WebhookNotifier::new(format!("{}/hooks/sync", server.url())).unwrap();
        notifier
            .notify_failure(&config, &failed_outcome())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/sync")
            .with_status(500)
            .create_async()
            .await;

        let config = ConfigurationUpsert::named("nightly").create(1, 0);
        let notifier = WebhookNotifier::new(format!("{}/hooks/sync", server.url())).unwrap();
        assert!(
            notifier
                .notify_failure(&config, &failed_outcome())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn webhook_carries_the_thrown_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/sync")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "errors": ["data source error: connection refused"]
            })))
            .with_status(200)
            .create_async()
            .await;

        let config = ConfigurationUpsert::named("nightly").create(1, 0);
        let outcome = SyncOutcome {
            success: false,
            log_id: 12,
            result: None,
            error: Some("data source error: connection refused".into()),
        };
        let notifier = WebhookNotifier::new(format!("{}/hooks/sync", server.url())).unwrap();
        notifier.notify_failure(&config, &outcome).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_webhook_times_out() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/sync")
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(Duration::from_secs(2));
                Vec::new()
            })
            .create_async()
            .await;

        let config = ConfigurationUpsert::named("nightly").create(1, 0);
        let notifier = WebhookNotifier::with_timeout(
            format!("{}/hooks/sync", server.url()),
            Duration::from_millis(100),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let err = notifier
            .notify_failure(&config, &failed_outcome())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(ref e) if e.is_timeout()), "{err}");
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
