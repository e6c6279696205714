//! Credentials and the OAuth refresh flow.

mod storage;

pub use storage::{FileTokenStorage, InMemoryTokenStorage, TokenStorage, DEFAULT_TOKEN_FILE};

use crate::config::OAuthAppConfig;
use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};

/// Access/refresh token pair. Expiry is not known.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Access token.
    pub access_token: SecretString,
    /// Refresh token, when the app issues expiring tokens.
    pub refresh_token: Option<SecretString>,
}

impl Credential {
    /// Creates a credential without a refresh token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: None,
        }
    }

    /// Sets the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::new(refresh_token.into()));
        self
    }

    /// Gets the token prefix for logging.
    pub fn token_prefix(&self) -> &'static str {
        let exposed = self.access_token.expose_secret();
        if exposed.starts_with("ghp_") {
            "ghp_***"
        } else if exposed.starts_with("github_pat_") {
            "github_pat_***"
        } else if exposed.starts_with("gho_") {
            "gho_***"
        } else if exposed.starts_with("ghu_") {
            "ghu_***"
        } else {
            "***"
        }
    }
}

/// Source of the access token and the refresh capability.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Gets the current access token.
    async fn access_token(&self) -> GitHubResult<SecretString>;

    /// Attempts to replace the credential. Returns false when it cannot.
    async fn refresh(&self) -> bool;
}

/// Fixed token that cannot be refreshed.
pub struct StaticCredentialProvider {
    token: SecretString,
}

impl StaticCredentialProvider {
    /// Creates a provider for a fixed token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
        }
    }

    /// Reads the token from an environment variable such as `GITHUB_TOKEN`.
    pub fn from_env_var(var_name: &str) -> GitHubResult<Self> {
        std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                GitHubError::new(
                    GitHubErrorKind::MissingAuth,
                    format!("Environment variable {} not set", var_name),
                )
            })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn access_token(&self) -> GitHubResult<SecretString> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> bool {
        false
    }
}

/// Token endpoint response. GitHub reports failures as 200 with `error`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Resolves once a credential is first installed.
#[derive(Debug)]
pub struct AuthCompletion {
    receiver: oneshot::Receiver<()>,
}

impl AuthCompletion {
    /// Waits for the first credential. Fails if the provider is dropped first.
    pub async fn wait(self) -> GitHubResult<()> {
        self.receiver.await.map_err(|_| {
            GitHubError::new(
                GitHubErrorKind::MissingAuth,
                "Authorization finished without a credential",
            )
        })
    }
}

/// OAuth app credential provider backed by token storage.
pub struct OAuthCredentialProvider {
    app: OAuthAppConfig,
    http: reqwest::Client,
    credential: RwLock<Option<Credential>>,
    storage: Arc<dyn TokenStorage>,
    notifier: Mutex<Option<oneshot::Sender<()>>>,
    completion: Mutex<Option<AuthCompletion>>,
}

impl OAuthCredentialProvider {
    /// Creates a provider without a credential.
    pub fn new(app: OAuthAppConfig, storage: Arc<dyn TokenStorage>) -> GitHubResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(crate::config::DEFAULT_TIMEOUT)
            .connect_timeout(crate::config::DEFAULT_CONNECT_TIMEOUT)
            .user_agent(crate::config::DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| {
                GitHubError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        let (sender, receiver) = oneshot::channel();
        Ok(Self {
            app,
            http,
            credential: RwLock::new(None),
            storage,
            notifier: Mutex::new(Some(sender)),
            completion: Mutex::new(Some(AuthCompletion { receiver })),
        })
    }

    /// Takes the completion signal. Only the first caller gets it.
    pub async fn completion(&self) -> Option<AuthCompletion> {
        self.completion.lock().await.take()
    }

    /// Builds the page the user must visit to grant access.
    pub fn authorization_url(&self, state: Option<&str>) -> GitHubResult<String> {
        let scope = self.app.scopes.join(" ");
        let mut params = vec![
            ("client_id", self.app.client_id.as_str()),
            ("redirect_uri", self.app.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }

        url::Url::parse_with_params(&self.app.authorize_url, &params)
            .map(String::from)
            .map_err(|e| GitHubError::configuration(format!("Invalid authorize URL: {}", e)))
    }

    /// Restores a previously stored credential. Returns true if one was found.
    pub async fn load_stored(&self) -> GitHubResult<bool> {
        match self.storage.load().await? {
            Some(credential) => {
                self.install(credential).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Exchanges an authorization code for a credential and persists it.
    pub async fn exchange_code(&self, code: &str) -> GitHubResult<()> {
        let form = [
            ("client_id", self.app.client_id.as_str()),
            ("client_secret", self.app.client_secret.expose_secret().as_str()),
            ("code", code),
            ("redirect_uri", self.app.redirect_uri.as_str()),
        ];

        let response = self.request_token(&form).await?;
        let access_token = response.access_token.ok_or_else(|| {
            GitHubError::new(
                GitHubErrorKind::MissingAuth,
                format!(
                    "Code exchange failed: {}",
                    response
                        .error_description
                        .or(response.error)
                        .unwrap_or_else(|| "no access token returned".to_string())
                ),
            )
        })?;

        let credential = Credential {
            access_token: SecretString::new(access_token),
            refresh_token: response.refresh_token.map(SecretString::new),
        };
        tracing::info!(prefix = credential.token_prefix(), "Authorization code exchanged");
        self.persist(&credential).await;
        self.install(credential).await;
        Ok(())
    }

    /// Installs a credential directly.
    pub async fn set_credential(&self, credential: Credential) {
        self.install(credential).await;
    }

    /// Gets a copy of the held credential.
    pub async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    async fn install(&self, credential: Credential) {
        *self.credential.write().await = Some(credential);
        if let Some(sender) = self.notifier.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn persist(&self, credential: &Credential) {
        if let Err(e) = self.storage.save(credential).await {
            tracing::warn!(error = %e, "Failed to persist tokens");
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> GitHubResult<TokenResponse> {
        let response = self
            .http
            .post(&self.app.token_url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| GitHubError::transport(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::api(status.as_u16(), body));
        }

        response.json().await.map_err(|e| {
            GitHubError::deserialization(format!("Failed to parse token response: {}", e))
        })
    }

    async fn try_refresh(&self) -> GitHubResult<()> {
        let current = self.credential.read().await.clone();
        let refresh_token = current
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .ok_or_else(|| {
                GitHubError::new(GitHubErrorKind::MissingAuth, "No refresh token available")
            })?;

        let form = [
            ("client_id", self.app.client_id.as_str()),
            ("client_secret", self.app.client_secret.expose_secret().as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
        ];

        let response = self.request_token(&form).await?;
        let access_token = response.access_token.ok_or_else(|| {
            GitHubError::authentication_expired(
                response
                    .error_description
                    .or(response.error)
                    .unwrap_or_else(|| "Refresh returned no access token".to_string()),
            )
        })?;

        // GitHub may omit a new refresh token; the old one stays valid.
        let credential = Credential {
            access_token: SecretString::new(access_token),
            refresh_token: response
                .refresh_token
                .map(SecretString::new)
                .or(Some(refresh_token)),
        };
        self.persist(&credential).await;
        self.install(credential).await;
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for OAuthCredentialProvider {
    async fn access_token(&self) -> GitHubResult<SecretString> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or_else(|| GitHubError::new(GitHubErrorKind::MissingAuth, "Not authorized"))
    }

    async fn refresh(&self) -> bool {
        match self.try_refresh().await {
            Ok(()) => {
                tracing::info!("Access token refreshed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Access token refresh failed");
                false
            }
        }
    }
}
