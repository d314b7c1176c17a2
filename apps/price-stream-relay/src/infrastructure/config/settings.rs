//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::time::Duration;

use crate::application::services::RefreshPolicy;
use crate::domain::symbols::SymbolAllowList;

/// MetaApi credentials.
#[derive(Clone)]
pub struct Credentials {
    token: String,
    account_id: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(token: String, account_id: String) -> Self {
        Self { token, account_id }
    }

    /// Get the API token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get the trading account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Upstream MetaApi connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// MetaApi region the account is deployed in.
    pub region: String,
    /// MetaApi domain.
    pub domain: String,
    /// Full WebSocket URL, overriding region/domain when set.
    pub url_override: Option<String>,
    /// Tick throttle requested when subscribing.
    pub tick_interval: Duration,
    /// WebSocket connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the terminal to synchronize.
    pub sync_timeout: Duration,
    /// Time allowed for a request to be acknowledged.
    pub request_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            region: "new-york".to_string(),
            domain: "agiliumtrade.ai".to_string(),
            url_override: None,
            tick_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// SSE stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Keep-alive heartbeat period.
    pub heartbeat_interval: Duration,
    /// Events buffered per connection before new ones are dropped.
    pub client_buffer: usize,
    /// Whether `/latest` also ensures the symbol is subscribed upstream.
    pub latest_subscribes: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(2),
            client_buffer: 256,
            latest_subscribes: false,
        }
    }
}

/// Cache refresh settings.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// What the refresh does.
    pub policy: RefreshPolicy,
    /// Refresh period.
    pub interval: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            policy: RefreshPolicy::Off,
            interval: Duration::from_secs(1),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port serving streams, snapshots, health and metrics.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// SSE stream settings.
    pub stream: StreamSettings,
    /// Cache refresh settings.
    pub refresh: RefreshSettings,
    /// Symbols clients may request.
    pub symbols: SymbolAllowList,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = required(&lookup, "METAAPI_TOKEN")?;
        let account_id = required(&lookup, "METAAPI_ACCOUNT_ID")?;

        let server = ServerSettings {
            port: parse_env_u16(&lookup, "PORT", ServerSettings::default().port),
        };

        let defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            region: lookup("METAAPI_REGION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.region),
            domain: lookup("METAAPI_DOMAIN")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.domain),
            url_override: lookup("METAAPI_URL").filter(|v| !v.trim().is_empty()),
            tick_interval: parse_env_duration_millis(
                &lookup,
                "METAAPI_TICK_INTERVAL_MS",
                defaults.tick_interval,
            ),
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "METAAPI_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            sync_timeout: parse_env_duration_secs(
                &lookup,
                "METAAPI_SYNC_TIMEOUT_SECS",
                defaults.sync_timeout,
            ),
            request_timeout: parse_env_duration_secs(
                &lookup,
                "METAAPI_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
        };

        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_millis(
                &lookup,
                "RELAY_HEARTBEAT_INTERVAL_MS",
                StreamSettings::default().heartbeat_interval,
            ),
            client_buffer: parse_env_usize(
                &lookup,
                "RELAY_CLIENT_BUFFER",
                StreamSettings::default().client_buffer,
            )
            .max(1),
            latest_subscribes: parse_env_bool(
                &lookup,
                "RELAY_LATEST_SUBSCRIBES",
                StreamSettings::default().latest_subscribes,
            ),
        };

        let refresh = RefreshSettings {
            policy: lookup("RELAY_REFRESH_POLICY")
                .map(|s| RefreshPolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            interval: parse_env_duration_millis(
                &lookup,
                "RELAY_REFRESH_INTERVAL_MS",
                RefreshSettings::default().interval,
            ),
        };

        let symbols = match lookup("RELAY_SYMBOLS") {
            Some(list) => {
                let symbols = SymbolAllowList::new(list.split(','));
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("RELAY_SYMBOLS".to_string()));
                }
                symbols
            }
            None => SymbolAllowList::default(),
        };

        Ok(Self {
            credentials: Credentials::new(token, account_id),
            server,
            upstream,
            stream,
            refresh,
            symbols,
        })
    }

    /// Get the MetaApi streaming WebSocket URL.
    ///
    /// The token is carried as a percent-encoded query parameter.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        let base = self.upstream.url_override.clone().unwrap_or_else(|| {
            format!(
                "wss://mt-client-api-v1.{}.{}/ws",
                self.upstream.region, self.upstream.domain
            )
        });
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}auth-token={}",
            urlencoding::encode(self.credentials.token())
        )
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_u16<F>(lookup: &F, key: &str, default: u16) -> u16
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![("METAAPI_TOKEN", "tok-123"), ("METAAPI_ACCOUNT_ID", "acc-456")]
    }

    #[test]
    fn defaults_with_required_only() {
        let config = RelayConfig::from_lookup(lookup_from(&minimal())).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upstream.region, "new-york");
        assert_eq!(config.upstream.tick_interval, Duration::from_millis(250));
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.stream.client_buffer, 256);
        assert!(!config.stream.latest_subscribes);
        assert_eq!(config.refresh.policy, RefreshPolicy::Off);
        assert!(config.symbols.contains("EURUSD.A"));
    }

    #[test]
    fn missing_token_is_error() {
        let err = RelayConfig::from_lookup(lookup_from(&[("METAAPI_ACCOUNT_ID", "acc")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "METAAPI_TOKEN"));
    }

    #[test]
    fn empty_account_is_error() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("METAAPI_TOKEN", "tok"),
            ("METAAPI_ACCOUNT_ID", "  "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "METAAPI_ACCOUNT_ID"));
    }

    #[test]
    fn overrides_are_applied() {
        let mut vars = minimal();
        vars.extend([
            ("PORT", "9000"),
            ("METAAPI_REGION", "london"),
            ("RELAY_HEARTBEAT_INTERVAL_MS", "500"),
            ("RELAY_CLIENT_BUFFER", "8"),
            ("RELAY_LATEST_SUBSCRIBES", "true"),
            ("RELAY_REFRESH_POLICY", "broadcast"),
            ("RELAY_SYMBOLS", "EURUSD.a, btcusd.a ,"),
        ]);
        let config = RelayConfig::from_lookup(lookup_from(&vars)).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.upstream.region, "london");
        assert_eq!(config.stream.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.stream.client_buffer, 8);
        assert!(config.stream.latest_subscribes);
        assert_eq!(config.refresh.policy, RefreshPolicy::Broadcast);
        assert_eq!(config.symbols.len(), 2);
        assert!(!config.symbols.contains("XAUUSD.a"));
    }

    #[test]
    fn blank_symbol_list_is_error() {
        let mut vars = minimal();
        vars.push(("RELAY_SYMBOLS", " , "));
        let err = RelayConfig::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "RELAY_SYMBOLS"));
    }

    #[test_case("not-a-number", 8080 ; "garbage falls back")]
    #[test_case("", 8080 ; "empty falls back")]
    #[test_case(" 3000 ", 3000 ; "whitespace trimmed")]
    fn port_parsing(raw: &str, expected: u16) {
        let mut vars = minimal();
        vars.push(("PORT", raw));
        let config = RelayConfig::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(config.server.port, expected);
    }

    #[test_case("1", true)]
    #[test_case("TRUE", true)]
    #[test_case("on", true)]
    #[test_case("0", false)]
    #[test_case("nope", false)]
    fn bool_parsing(raw: &str, expected: bool) {
        let lookup = lookup_from(&[("FLAG", raw)]);
        assert_eq!(parse_env_bool(&lookup, "FLAG", !expected), expected);
    }

    #[test]
    fn zero_duration_falls_back() {
        let lookup = lookup_from(&[("INTERVAL", "0")]);
        assert_eq!(
            parse_env_duration_millis(&lookup, "INTERVAL", Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn upstream_url_derived_from_region() {
        let config = RelayConfig::from_lookup(lookup_from(&minimal())).unwrap();
        assert_eq!(
            config.upstream_url(),
            "wss://mt-client-api-v1.new-york.agiliumtrade.ai/ws?auth-token=tok-123"
        );
    }

    #[test]
    fn upstream_url_override_keeps_query() {
        let mut vars = minimal();
        vars.push(("METAAPI_URL", "ws://127.0.0.1:9999/ws?x=1"));
        let config = RelayConfig::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(
            config.upstream_url(),
            "ws://127.0.0.1:9999/ws?x=1&auth-token=tok-123"
        );
    }

    #[test]
    fn upstream_url_encodes_token() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("METAAPI_TOKEN", "a&b#c+d=e f"),
            ("METAAPI_ACCOUNT_ID", "acc-456"),
        ]))
        .unwrap();
        assert_eq!(
            config.upstream_url(),
            "wss://mt-client-api-v1.new-york.agiliumtrade.ai/ws?auth-token=a%26b%23c%2Bd%3De%20f"
        );
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("secret-token".to_string(), "acc-1".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("acc-1"));
    }
}
