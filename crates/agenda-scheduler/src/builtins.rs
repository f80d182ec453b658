//! Built-in notifiers and actions registered at startup.
//!
//! - notifier `console`: logs the reminder
//! - notifier `webhook`: posts the reminder (only with `actions.notify_webhook_url`)
//! - action `hello`: logs
//! - lights: `lights_on`, `lights_off`, `dim_lights`, and `lights_<colour>` per
//!   colour, each also under its camelCase name (`lightsOn`, `lightsRed`, ...)

use std::sync::Arc;

use agenda_core::config::ActionsConfig;
use agenda_core::error::{AgendaError, Result};
use serde_json::json;

use crate::dispatch;
use crate::registry::CallbackRegistry;

/// Colours the light protocol accepts.
pub const LIGHT_COLORS: [&str; 8] = [
    "red", "blue", "green", "yellow", "white", "purple", "orange", "pink",
];

/// Client for the home-automation protocol endpoint.
#[derive(Clone)]
pub struct ProtocolClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ProtocolClient {
    pub fn new(config: &ActionsConfig) -> Result<Self> {
        Ok(Self {
            client: dispatch::build_client(&config.timeouts)?,
            endpoint: config.protocol_endpoint.clone(),
        })
    }

    pub async fn run(&self, protocol_name: &str, arguments: serde_json::Value) -> Result<()> {
        dispatch::run_protocol(&self.client, &self.endpoint, protocol_name, arguments).await
    }

    pub async fn lights_on(&self) -> Result<()> {
        self.run("lights_on", json!({})).await
    }

    pub async fn lights_off(&self) -> Result<()> {
        self.run("lights_off", json!({})).await
    }

    pub async fn dim_lights(&self) -> Result<()> {
        self.run("Dim All Lights", json!({})).await
    }

    /// Set every light to `color`. Unknown colours are rejected before any request.
    pub async fn set_color(&self, color: &str) -> Result<()> {
        let color = validate_color(color)?;
        self.run("Light Color Control", json!({ "color": color })).await
    }
}

/// Normalise and check a colour name.
pub fn validate_color(color: &str) -> Result<&'static str> {
    let wanted = color.trim().to_ascii_lowercase();
    LIGHT_COLORS
        .iter()
        .find(|c| **c == wanted)
        .copied()
        .ok_or_else(|| {
            AgendaError::invalid_event(format!(
                "Invalid color: {color}. Valid colors are: {}",
                LIGHT_COLORS.join(", ")
            ))
        })
}

fn camel(prefix: &str, word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

/// Register every built-in handler. Returns the protocol client the light
/// actions share.
pub fn register_builtins(registry: &CallbackRegistry, config: &ActionsConfig) -> Result<Arc<ProtocolClient>> {
    registry.register_notifier("console", |id, title| async move {
        tracing::info!("⏰ Reminder: {title} ({id})");
        anyhow::Ok(())
    });

    if let Some(url) = config.notify_webhook_url.clone().filter(|u| !u.trim().is_empty()) {
        let client = dispatch::build_client(&config.timeouts)?;
        registry.register_notifier("webhook", move |id, title| {
            let client = client.clone();
            let url = url.clone();
            async move {
                dispatch::send_webhook(&client, &url, &id, &title).await?;
                anyhow::Ok(())
            }
        });
    }

    registry.register_action("hello", || async {
        tracing::info!("👋 Hello from the scheduler");
        anyhow::Ok(())
    });

    let protocols = Arc::new(ProtocolClient::new(config)?);

    for (snake, camel_name) in [("lights_on", "lightsOn"), ("lights_off", "lightsOff"), ("dim_lights", "dimLights")] {
        for name in [snake, camel_name] {
            let protocols = protocols.clone();
            registry.register_action(name, move || {
                let protocols = protocols.clone();
                async move {
                    match snake {
                        "lights_on" => protocols.lights_on().await?,
                        "lights_off" => protocols.lights_off().await?,
                        _ => protocols.dim_lights().await?,
                    }
                    anyhow::Ok(())
                }
            });
        }
    }

    for color in LIGHT_COLORS {
        for name in [format!("lights_{color}"), camel("lights", color)] {
            let protocols = protocols.clone();
            registry.register_action(&name, move || {
                let protocols = protocols.clone();
                async move {
                    protocols.set_color(color).await?;
                    anyhow::Ok(())
                }
            });
        }
    }

    tracing::info!(
        "🧩 Built-ins registered: {} notifiers, {} actions",
        registry.notifier_names().len(),
        registry.action_names().len()
    );
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ActionsConfig {
        ActionsConfig {
            protocol_endpoint: format!("{}/protocols/run", server.uri()),
            ..ActionsConfig::default()
        }
    }

    #[test]
    fn test_names_registered_in_both_styles() {
        let registry = CallbackRegistry::new();
        register_builtins(&registry, &ActionsConfig::default()).unwrap();
        let actions = registry.action_names();
        for name in ["hello", "lights_on", "lightsOn", "lights_off", "lightsOff", "dim_lights", "lights_purple", "lightsPurple"] {
            assert!(actions.contains(&name.to_string()), "missing {name}");
        }
        assert_eq!(registry.notifier_names(), vec!["console"]);
    }

    #[test]
    fn test_webhook_notifier_only_when_configured() {
        let registry = CallbackRegistry::new();
        let config = ActionsConfig {
            notify_webhook_url: Some("http://127.0.0.1:9/hook".into()),
            ..ActionsConfig::default()
        };
        register_builtins(&registry, &config).unwrap();
        assert_eq!(registry.notifier_names(), vec!["console", "webhook"]);
    }

    #[test]
    fn test_validate_color() {
        assert_eq!(validate_color(" Blue ").unwrap(), "blue");
        assert!(validate_color("read").is_err());
        assert!(validate_color("").is_err());
    }

    #[tokio::test]
    async fn test_color_action_posts_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/protocols/run"))
            .and(body_partial_json(json!({
                "protocol_name": "Light Color Control",
                "arguments": {"color": "green"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let registry = CallbackRegistry::new();
        register_builtins(&registry, &config_for(&server)).unwrap();
        registry.bind_action("lights_green").unwrap()().await.unwrap();
        registry.bind_action("lightsGreen").unwrap()().await.unwrap();
    }

    #[tokio::test]
    async fn test_lights_off_and_dim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"protocol_name": "lights_off"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"protocol_name": "Dim All Lights"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let protocols = ProtocolClient::new(&config_for(&server)).unwrap();
        protocols.lights_off().await.unwrap();
        protocols.dim_lights().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_color_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let protocols = ProtocolClient::new(&config_for(&server)).unwrap();
        assert!(protocols.set_color("ultraviolet").await.is_err());
    }
}
