//! Configuration management

use std::{env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::keys::DEFAULT_KEYS_URL;
use crate::oauth::CALLBACK_PATH;
use crate::{Error, Result};

/// Prefix for namespaced environment variables (`COPILOT_GATEWAY_SERVER__PORT`).
pub const ENV_PREFIX: &str = "COPILOT_GATEWAY_";

/// Main configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secrets are resolved.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Listener configuration
    pub server: ServerConfig,
    /// Platform signing key retrieval
    pub keys: KeysConfig,
    /// OAuth client configuration
    pub oauth: OAuthConfig,
    /// Downstream agent configuration
    pub agent: AgentConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (required)
    pub port: u16,
    /// Internet-facing base address, e.g. `https://ext.example.com` (required)
    pub public_url: Option<String>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            public_url: None,
            request_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Signing key retrieval configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Key-listing endpoint
    pub url: String,
    /// Optional bearer credential for higher rate limits.
    /// Supports a literal value or `env:VAR_NAME`.
    pub bearer_token: Option<String>,
    /// User-Agent sent with key requests
    pub user_agent: String,
    /// Timeout for the key request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Minimum key age before a verification failure may trigger a refetch
    #[serde(with = "humantime_serde")]
    pub refresh_cooldown: Duration,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_KEYS_URL.to_string(),
            bearer_token: None,
            user_agent: concat!("copilot-trust-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            refresh_cooldown: Duration::from_secs(30),
        }
    }
}

impl KeysConfig {
    /// Resolve the bearer credential (expand `env:` references, drop empty values)
    #[must_use]
    pub fn resolve_bearer_token(&self) -> Option<String> {
        self.bearer_token
            .as_deref()
            .map(resolve_secret)
            .filter(|token| !token.is_empty())
    }
}

impl fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeysConfig")
            .field("url", &self.url)
            .field("bearer_token", &redacted(self.bearer_token.as_ref()))
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .field("refresh_cooldown", &self.refresh_cooldown)
            .finish()
    }
}

/// OAuth client configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Client identifier of the platform app (required)
    pub client_id: String,
    /// Client secret of the platform app (required; supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Platform authorization page
    pub authorize_url: String,
    /// Platform token endpoint
    pub token_url: String,
    /// Optional scope requested on authorization
    pub scope: Option<String>,
    /// How long a pending authorization attempt stays valid
    #[serde(with = "humantime_serde")]
    pub attempt_ttl: Duration,
    /// Lifetime of a session token when the platform states no expiry
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Interval of the expired-entry sweep
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
    /// Timeout for the token exchange request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            scope: None,
            attempt_ttl: Duration::from_secs(10 * 60),
            session_ttl: Duration::from_secs(8 * 60 * 60),
            reap_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }
}

impl OAuthConfig {
    /// Resolve the client secret (expand `env:` references)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(Some(&self.client_secret).filter(|s| !s.is_empty())))
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("scope", &self.scope)
            .field("attempt_ttl", &self.attempt_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("reap_interval", &self.reap_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Downstream chat agent configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where verified chat requests are forwarded. Without one the protected
    /// endpoint answers 503 after verification.
    pub upstream_url: Option<String>,
    /// Timeout for the forwarded request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            upstream_url: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Layering, later wins: defaults, YAML file, `COPILOT_GATEWAY_*`, then
    /// the bare `PORT`/`FQDN`/`CLIENT_ID`/`CLIENT_SECRET`/`GITHUB_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(legacy_env());

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files may supply the legacy variables, so extract again after loading
        if config.load_env_files() > 0 {
            config = figment
                .extract()
                .map_err(|e| Error::Config(e.to_string()))?;
        }

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) -> usize {
        let mut loaded = 0;
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
        loaded
    }

    /// Check that every required value is present and well formed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port (PORT) is required".to_string()));
        }

        let public = self.public_url()?;
        if public.scheme() != "https" {
            tracing::warn!(url = %public, "Public URL is not HTTPS; the platform will refuse the callback");
        }

        if self.oauth.client_id.trim().is_empty() {
            return Err(Error::Config("oauth.client_id (CLIENT_ID) is required".to_string()));
        }
        if self.oauth.resolve_client_secret().trim().is_empty() {
            return Err(Error::Config(
                "oauth.client_secret (CLIENT_SECRET) is required".to_string(),
            ));
        }
        if self.oauth.attempt_ttl.is_zero() {
            return Err(Error::Config("oauth.attempt_ttl must be non-zero".to_string()));
        }

        for (name, value) in [
            ("keys.url", self.keys.url.as_str()),
            ("oauth.authorize_url", self.oauth.authorize_url.as_str()),
            ("oauth.token_url", self.oauth.token_url.as_str()),
        ] {
            let url = parse_http_url(name, value)?;
            if url.scheme() != "https" {
                tracing::warn!(setting = name, url = %url, "Upstream URL is not HTTPS");
            }
        }

        if let Some(ref upstream) = self.agent.upstream_url {
            parse_http_url("agent.upstream_url", upstream)?;
        }

        Ok(())
    }

    /// Parsed `server.public_url`.
    pub fn public_url(&self) -> Result<Url> {
        let raw = self
            .server
            .public_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Config("server.public_url (FQDN) is required".to_string()))?;
        parse_http_url("server.public_url", raw)
    }

    /// Redirect-back address registered with the platform.
    pub fn callback_url(&self) -> Result<Url> {
        let mut url = self.public_url()?;
        url.set_path(CALLBACK_PATH);
        url.set_query(None);
        Ok(url)
    }

    /// Configuration summary with secrets reduced to presence flags
    #[must_use]
    pub fn redacted_summary(&self) -> Value {
        json!({
            "server": {
                "host": self.server.host,
                "port": self.server.port,
                "public_url": self.server.public_url,
                "max_body_size": self.server.max_body_size,
            },
            "keys": {
                "url": self.keys.url,
                "bearer_token": self.keys.resolve_bearer_token().is_some(),
                "refresh_cooldown": humantime::format_duration(self.keys.refresh_cooldown).to_string(),
            },
            "oauth": {
                "client_id": self.oauth.client_id,
                "client_secret": !self.oauth.resolve_client_secret().is_empty(),
                "authorize_url": self.oauth.authorize_url,
                "token_url": self.oauth.token_url,
                "attempt_ttl": humantime::format_duration(self.oauth.attempt_ttl).to_string(),
            },
            "agent": {
                "upstream_url": self.agent.upstream_url,
            },
        })
    }
}

/// Map the bare variable names of earlier deployments onto config keys.
fn legacy_env() -> Env {
    Env::raw()
        .only(&["PORT", "FQDN", "CLIENT_ID", "CLIENT_SECRET", "GITHUB_TOKEN"])
        .map(|key| match key.as_str().to_ascii_lowercase().as_str() {
            "port" => "server.port".into(),
            "fqdn" => "server.public_url".into(),
            "client_id" => "oauth.client_id".into(),
            "client_secret" => "oauth.client_secret".into(),
            "github_token" => "keys.bearer_token".into(),
            other => other.to_string().into(),
        })
}

fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

fn redacted(value: Option<&String>) -> &'static str {
    if value.is_some() { "<redacted>" } else { "<unset>" }
}

fn parse_http_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| Error::Config(format!("{name}: invalid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!("{name}: unsupported scheme '{other}'"))),
    }
}
