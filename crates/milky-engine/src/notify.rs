use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use milky_core::OperatorNotifier;

/// Chat webhooks reject longer messages.
const MAX_CONTENT_CHARS: usize = 1900;

/// Posts `{"content": "..."}` to an operator webhook. Delivery failures are
/// logged and dropped.
pub struct WebhookNotifier {
    client: Client,
    url: SecretString,
}

impl WebhookNotifier {
    pub fn new(url: SecretString) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

fn render(subject: &str, detail: &str) -> String {
    let text = format!("**{subject}**\n{detail}");
    if text.chars().count() <= MAX_CONTENT_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_CONTENT_CHARS).collect();
    cut.push('…');
    cut
}

#[async_trait]
impl OperatorNotifier for WebhookNotifier {
    async fn notify(&self, subject: &str, detail: &str) {
        let body = serde_json::json!({ "content": render(subject, detail) });
        match self
            .client
            .post(self.url.expose_secret())
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => debug!(subject, "operator notified"),
            Ok(resp) => warn!(subject, status = resp.status().as_u16(), "operator webhook rejected"),
            Err(e) => warn!(subject, error = %e, "operator webhook unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_content_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "content": "**Data save failed**\nhf://datasets/x: 503"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(SecretString::from(format!("{}/hook", server.uri())));
        notifier.notify("Data save failed", "hf://datasets/x: 503").await;
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let notifier = WebhookNotifier::new(SecretString::from(server.uri()));
        notifier.notify("x", "y").await;

        let unreachable = WebhookNotifier::new(SecretString::from("http://127.0.0.1:9/hook".to_string()));
        unreachable.notify("x", "y").await;
    }

    #[test]
    fn long_details_are_cut() {
        let text = render("s", &"a".repeat(5000));
        assert_eq!(text.chars().count(), MAX_CONTENT_CHARS + 1);
        assert!(text.ends_with('…'));
    }
}
