//! Configuration types for the importer.

use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult};
use std::time::Duration;

/// Default GitHub API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default GitHub API version (date-based).
pub const DEFAULT_API_VERSION: &str = "2022-11-28";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "github-importer/0.1.0";

/// Default delay between GraphQL issue deletions.
pub const DEFAULT_DELETE_DELAY: Duration = Duration::from_millis(500);

/// Default page size for list requests (GitHub maximum).
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default OAuth authorization endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Default OAuth scope.
pub const DEFAULT_SCOPE: &str = "repo,repo:status,write:repo,write:issues";

/// Rate limit configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Wait for the reset before a call when the tracked budget is exhausted.
    pub preemptive_throttling: bool,
    /// Honor rate-limit responses with one wait-and-retry.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            preemptive_throttling: true,
            enabled: true,
        }
    }
}

/// Bulk operation configuration.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Pause between consecutive issue deletions.
    pub delete_delay: Duration,
    /// Items per page for REST and GraphQL listing (max 100).
    pub page_size: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            delete_delay: DEFAULT_DELETE_DELAY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// GitHub client configuration.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL.
    pub base_url: String,
    /// API version header.
    pub api_version: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Rate limit configuration.
    pub rate_limit: RateLimitConfig,
    /// Bulk operation configuration.
    pub bulk: BulkConfig,
    /// Connection pool configuration.
    pub pool: PoolConfig,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rate_limit: RateLimitConfig::default(),
            bulk: BulkConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl GitHubConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> GitHubConfigBuilder {
        GitHubConfigBuilder::new()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> GitHubResult<()> {
        if self.base_url.is_empty() {
            return Err(GitHubError::new(
                GitHubErrorKind::InvalidBaseUrl,
                "Base URL cannot be empty",
            ));
        }

        if url::Url::parse(&self.base_url).is_err()
            || (!self.base_url.starts_with("http://") && !self.base_url.starts_with("https://"))
        {
            return Err(GitHubError::new(
                GitHubErrorKind::InvalidBaseUrl,
                "Base URL must be an http:// or https:// URL",
            ));
        }

        if self.user_agent.is_empty() {
            return Err(GitHubError::configuration("User-Agent is required by GitHub API"));
        }

        if self.bulk.page_size == 0 || self.bulk.page_size > 100 {
            return Err(GitHubError::configuration("Page size must be between 1 and 100"));
        }

        Ok(())
    }

    /// Returns the GraphQL endpoint derived from the base URL.
    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url.trim_end_matches('/'))
    }
}

/// Builder for GitHubConfig.
#[derive(Debug, Default)]
pub struct GitHubConfigBuilder {
    base_url: Option<String>,
    api_version: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    rate_limit: Option<RateLimitConfig>,
    bulk: Option<BulkConfig>,
    pool: Option<PoolConfig>,
}

impl GitHubConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the rate limit configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Disables the preemptive wait before calls.
    pub fn no_preemptive_throttling(mut self) -> Self {
        self.rate_limit = Some(RateLimitConfig {
            preemptive_throttling: false,
            ..self.rate_limit.unwrap_or_default()
        });
        self
    }

    /// Sets the bulk operation configuration.
    pub fn bulk(mut self, config: BulkConfig) -> Self {
        self.bulk = Some(config);
        self
    }

    /// Sets the delay between issue deletions.
    pub fn delete_delay(mut self, delay: Duration) -> Self {
        self.bulk = Some(BulkConfig {
            delete_delay: delay,
            ..self.bulk.unwrap_or_default()
        });
        self
    }

    /// Sets the connection pool configuration.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> GitHubResult<GitHubConfig> {
        let config = GitHubConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: self.api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            rate_limit: self.rate_limit.unwrap_or_default(),
            bulk: self.bulk.unwrap_or_default(),
            pool: self.pool.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

/// OAuth application settings supplied by the host process.
#[derive(Debug, Clone)]
pub struct OAuthAppConfig {
    /// OAuth app client id.
    pub client_id: String,
    /// OAuth app client secret.
    pub client_secret: secrecy::SecretString,
    /// Redirect URI registered with the app.
    pub redirect_uri: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Authorization page.
    pub authorize_url: String,
    /// Token exchange and refresh endpoint.
    pub token_url: String,
}

impl OAuthAppConfig {
    /// Creates a configuration with the default GitHub endpoints and scope.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: secrecy::SecretString::new(client_secret.into()),
            redirect_uri: redirect_uri.into(),
            scopes: parse_scopes(DEFAULT_SCOPE),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    /// Reads `GITHUB_CLIENT_ID`, `GITHUB_CLIENT_SECRET`, `GITHUB_REDIRECT_URI`
    /// and the optional `GITHUB_SCOPE`.
    pub fn from_env() -> GitHubResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> GitHubResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                GitHubError::new(
                    GitHubErrorKind::MissingAuth,
                    format!("Environment variable {} not set", key),
                )
            })
        };

        let mut config = Self::new(
            required("GITHUB_CLIENT_ID")?,
            required("GITHUB_CLIENT_SECRET")?,
            required("GITHUB_REDIRECT_URI")?,
        );
        if let Some(scope) = lookup("GITHUB_SCOPE").filter(|v| !v.is_empty()) {
            config.scopes = parse_scopes(&scope);
        }
        Ok(config)
    }

    /// Overrides the OAuth endpoints (GitHub Enterprise or tests).
    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self
    }
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GitHubConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.bulk.delete_delay, Duration::from_millis(500));
        assert_eq!(config.bulk.page_size, 100);
    }

    #[test]
    fn test_config_builder() {
        let config = GitHubConfig::builder()
            .base_url("https://github.example.com/api/v3")
            .user_agent("test-client/1.0")
            .timeout(Duration::from_secs(60))
            .delete_delay(Duration::ZERO)
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.user_agent, "test-client/1.0");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.bulk.delete_delay, Duration::ZERO);
        assert_eq!(config.graphql_url(), "https://github.example.com/api/v3/graphql");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = GitHubConfig::builder().base_url("invalid-url").build();
        assert_eq!(result.unwrap_err().kind(), GitHubErrorKind::InvalidBaseUrl);
    }

    #[test]
    fn test_invalid_page_size() {
        let result = GitHubConfig::builder()
            .bulk(BulkConfig {
                page_size: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_oauth_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GITHUB_CLIENT_ID", "abc"),
            ("GITHUB_CLIENT_SECRET", "shh"),
            ("GITHUB_REDIRECT_URI", "http://localhost:8000/callback"),
        ]
        .into_iter()
        .collect();

        let config = OAuthAppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(
            config.scopes,
            vec!["repo", "repo:status", "write:repo", "write:issues"]
        );
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn test_oauth_missing_secret() {
        let err = OAuthAppConfig::from_lookup(|k| {
            (k == "GITHUB_CLIENT_ID").then(|| "abc".to_string())
        })
        .unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::MissingAuth);
        assert!(err.message().contains("GITHUB_CLIENT_SECRET"));
    }

    #[test]
    fn test_custom_scope() {
        let config = OAuthAppConfig::from_lookup(|k| match k {
            "GITHUB_SCOPE" => Some("repo read:user".to_string()),
            _ => Some("x".to_string()),
        })
        .unwrap();
        assert_eq!(config.scopes, vec!["repo", "read:user"]);
    }
}
