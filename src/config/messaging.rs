//! Messaging and notification service configuration types.

use serde::Deserialize;

/// Default byte length of locally minted notification-service tokens.
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

/// Notification service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Broker connection parameters.
    pub amqp: AmqpConfig,
    /// Random bytes in a minted account token (hex doubles the length).
    pub token_length: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            amqp: AmqpConfig::default(),
            token_length: DEFAULT_TOKEN_LENGTH,
        }
    }
}

/// AMQP connection parameters.
///
/// Either a full `url`, or discrete host/port/vhost/credentials. A `url`
/// takes precedence when both are set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// Full AMQP connection URL.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5672,
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl AmqpConfig {
    /// Resolve the URL lapin connects to.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            encode_vhost(&self.vhost)
        )
    }
}

/// Percent-encode a vhost for the URL path segment ("/" -> "%2f").
fn encode_vhost(vhost: &str) -> String {
    vhost.replace('%', "%25").replace('/', "%2f")
}
