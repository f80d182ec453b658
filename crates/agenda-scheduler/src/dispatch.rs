//! Outbound HTTP — wake calls, protocol runs, reminder webhooks.
//! Every request goes through a client built with connect and total timeouts.

use std::time::Duration;

use agenda_core::config::HttpTimeouts;
use agenda_core::error::{AgendaError, Result};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Build a client honouring the configured timeouts.
pub fn build_client(timeouts: &HttpTimeouts) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_timeout_seconds))
        .timeout(Duration::from_secs(timeouts.total_timeout_seconds))
        .build()
        .map_err(|e| AgendaError::transport(format!("HTTP client init: {e}")))
}

/// POST a JSON body; non-2xx responses are errors.
pub async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<()> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| AgendaError::transport(format!("POST {url} failed: {e}")))?;

    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        let text = resp.text().await.unwrap_or_default();
        Err(AgendaError::transport(format!("POST {url} returned {status}: {text}")))
    }
}

/// Run a named protocol on the home-automation endpoint.
pub async fn run_protocol(
    client: &reqwest::Client,
    endpoint: &str,
    protocol_name: &str,
    arguments: Value,
) -> Result<()> {
    let body = json!({
        "protocol_name": protocol_name,
        "arguments": arguments,
    });
    post_json(client, endpoint, &body).await?;
    tracing::info!("💡 Protocol '{protocol_name}' sent");
    Ok(())
}

/// POST a reminder for an event.
pub async fn send_webhook(client: &reqwest::Client, url: &str, id: &str, title: &str) -> Result<()> {
    let body = json!({
        "id": id,
        "title": title,
        "source": "agenda",
        "timestamp": Utc::now().to_rfc3339(),
    });
    post_json(client, url, &body).await?;
    tracing::info!("✅ Webhook reminder sent: {title}");
    Ok(())
}

/// Why a wake call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Scheduled,
    Manual,
}

impl WakeReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

/// POST a wake request. The endpoint needs no body; context is sent anyway.
pub async fn send_wake(
    client: &reqwest::Client,
    url: &str,
    reason: WakeReason,
    first_event_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let body = json!({
        "source": "agenda",
        "reason": reason.as_str(),
        "first_event_at": first_event_at.map(|t| t.to_rfc3339()),
    });
    post_json(client, url, &body).await?;
    tracing::info!("📡 Wake call sent ({})", reason.as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        build_client(&HttpTimeouts::default()).unwrap()
    }

    #[tokio::test]
    async fn test_run_protocol_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/protocols/run"))
            .and(body_partial_json(json!({
                "protocol_name": "Light Color Control",
                "arguments": {"color": "blue"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = format!("{}/protocols/run", server.uri());
        run_protocol(&client(), &endpoint, "Light Color Control", json!({"color": "blue"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = send_webhook(&client(), &server.uri(), "1", "Dentist").await.unwrap_err();
        assert!(matches!(err, AgendaError::Transport(ref m) if m.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let timeouts = HttpTimeouts {
            connect_timeout_seconds: 1,
            total_timeout_seconds: 1,
        };
        let client = build_client(&timeouts).unwrap();
        let err = send_wake(&client, &server.uri(), WakeReason::Manual, None).await.unwrap_err();
        assert!(matches!(err, AgendaError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let err = send_wake(&client(), "http://127.0.0.1:9/wake", WakeReason::Scheduled, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgendaError::Transport(_)));
    }
}
