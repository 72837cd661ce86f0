//! Application configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use fleetchat_shared::UserType;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // HTTP API
    pub api_base_url: String,
    pub storage_url: String,
    pub http_timeout_ms: u64,

    // Realtime (Pusher protocol, served by Laravel Reverb)
    pub pusher_app_key: String,
    pub pusher_host: String,
    pub pusher_port: u16,
    pub pusher_force_tls: bool,

    // Local storage
    pub auth_token_path: PathBuf,
    pub download_dir: PathBuf,

    // Session
    pub user_type: UserType,

    // Maps
    pub mapbox_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            env::var("API_BASE_URL").map_err(|_| ConfigError::Missing("API_BASE_URL"))?;
        url::Url::parse(&api_base_url)
            .map_err(|_| ConfigError::Invalid("API_BASE_URL must be an absolute URL"))?;

        Ok(Self {
            // Attachments are served from the API host unless a CDN is configured
            storage_url: env::var("STORAGE_URL")
                .unwrap_or_else(|_| format!("{}/storage", api_base_url.trim_end_matches('/'))),
            api_base_url,
            http_timeout_ms: env::var("HTTP_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30000),

            pusher_app_key: env::var("PUSHER_APP_KEY")
                .map_err(|_| ConfigError::Missing("PUSHER_APP_KEY"))?,
            pusher_host: env::var("PUSHER_HOST").unwrap_or_else(|_| "localhost".to_string()),
            pusher_port: match env::var("PUSHER_PORT") {
                Ok(port) => port
                    .parse()
                    .map_err(|_| ConfigError::Invalid("PUSHER_PORT must be a port number"))?,
                Err(_) => 443,
            },
            pusher_force_tls: env::var("PUSHER_FORCE_TLS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            auth_token_path: Self::auth_token_path(),
            download_dir: env::var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("downloads")),

            user_type: env::var("USER_TYPE")
                .unwrap_or_else(|_| "client".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("USER_TYPE must be client or vehicle"))?,

            mapbox_token: env::var("MAPBOX_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Where the login token is persisted (`AUTH_TOKEN_PATH`)
    ///
    /// Needs none of the other variables, so token management works before
    /// the API is configured.
    pub fn auth_token_path() -> PathBuf {
        env::var("AUTH_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".fleetchat/token"))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Websocket endpoint for the configured Pusher app
    pub fn realtime_url(&self) -> String {
        let scheme = if self.pusher_force_tls { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/app/{}?protocol=7&client=fleetchat&version={}&flash=false",
            scheme,
            self.pusher_host,
            self.pusher_port,
            self.pusher_app_key,
            env!("CARGO_PKG_VERSION")
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "API_BASE_URL",
        "STORAGE_URL",
        "PUSHER_APP_KEY",
        "PUSHER_HOST",
        "PUSHER_PORT",
        "PUSHER_FORCE_TLS",
        "USER_TYPE",
        "MAPBOX_TOKEN",
        "AUTH_TOKEN_PATH",
    ];

    /// Helper to set required env vars for testing
    fn setup_minimal_config() {
        cleanup_config();
        env::set_var("API_BASE_URL", "https://api.example.test/api/");
        env::set_var("PUSHER_APP_KEY", "reverb-key");
    }

    /// Helper to clear env vars after tests
    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial(env)]
    fn test_defaults() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.storage_url, "https://api.example.test/api/storage");
        assert_eq!(config.pusher_port, 443);
        assert!(config.pusher_force_tls);
        assert_eq!(config.user_type, UserType::Client);
        assert!(config.mapbox_token.is_none());
        assert_eq!(
            config.realtime_url(),
            format!(
                "wss://localhost:443/app/reverb-key?protocol=7&client=fleetchat&version={}&flash=false",
                env!("CARGO_PKG_VERSION")
            )
        );

        cleanup_config();
    }

    #[test]
    #[serial(env)]
    fn test_missing_and_invalid_values() {
        cleanup_config();
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("API_BASE_URL"))
        ));

        setup_minimal_config();
        env::set_var("PUSHER_PORT", "not-a-port");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("PUSHER_PORT", "8080");
        env::set_var("USER_TYPE", "agent");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));

        env::set_var("USER_TYPE", "vehicle");
        env::set_var("PUSHER_FORCE_TLS", "false");
        let config = Config::from_env().unwrap();
        assert_eq!(config.user_type, UserType::Vehicle);
        assert!(config.realtime_url().starts_with("ws://localhost:8080/app/reverb-key"));

        cleanup_config();
    }

    #[test]
    #[serial(env)]
    fn test_token_path_needs_no_api_config() {
        cleanup_config();
        assert_eq!(Config::auth_token_path(), PathBuf::from(".fleetchat/token"));

        env::set_var("AUTH_TOKEN_PATH", "/tmp/fleetchat-token");
        assert_eq!(Config::auth_token_path(), PathBuf::from("/tmp/fleetchat-token"));
        assert!(Config::from_env().is_err());

        cleanup_config();
    }
}
