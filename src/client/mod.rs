//! GitHub API client and the resilient request executor.

use crate::auth::{CredentialProvider, StaticCredentialProvider};
use crate::config::{GitHubConfig, GitHubConfigBuilder};
use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult, RateLimitInfo};
use crate::observability::{redact_header, Metrics, RequestTimer, TracingHooks};
use crate::pagination::{Page, PaginationLinks};
use crate::resilience::{classify, extract_rate_limit, RateLimitState, RateLimitTracker, ResponseClass};
use crate::services::{GraphQLService, IssuesService, RepositoriesService, UsersService};
use chrono::Utc;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    Client, Method, Response,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// GitHub error response format.
#[derive(Debug, serde::Deserialize)]
struct GitHubErrorResponse {
    message: String,
    documentation_url: Option<String>,
}

/// GitHub API client.
///
/// Every logical call goes through [`GitHubClient::execute_request`], which
/// issues at most two physical requests: the original and one recovery retry
/// after a rate-limit wait or a credential refresh.
pub struct GitHubClient {
    /// HTTP client.
    http: Client,
    /// Configuration.
    config: GitHubConfig,
    /// Credential source and refresh capability.
    credentials: Arc<dyn CredentialProvider>,
    /// Access token currently in use.
    token: RwLock<Option<SecretString>>,
    /// Rate limit state of this client.
    rate_limit: RateLimitTracker,
    /// Request metrics.
    metrics: Arc<Metrics>,
}

impl GitHubClient {
    /// Creates a new GitHub client.
    pub fn new(config: GitHubConfig, credentials: Arc<dyn CredentialProvider>) -> GitHubResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .pool_idle_timeout(config.pool.idle_timeout)
            .build()
            .map_err(|e| {
                GitHubError::new(
                    GitHubErrorKind::InvalidConfiguration,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        Ok(Self {
            http,
            config,
            credentials,
            token: RwLock::new(None),
            rate_limit: RateLimitTracker::new(),
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Creates a new client builder.
    pub fn builder() -> GitHubClientBuilder {
        GitHubClientBuilder::new()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Gets the request metrics.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Gets the latest rate limit state.
    pub async fn rate_limit_state(&self) -> RateLimitState {
        self.rate_limit.snapshot().await
    }

    /// Gets the access token currently held, if one was fetched.
    pub async fn access_token(&self) -> Option<SecretString> {
        self.token.read().await.clone()
    }

    // Service accessors

    /// Gets the repositories service.
    pub fn repositories(&self) -> RepositoriesService<'_> {
        RepositoriesService::new(self)
    }

    /// Gets the issues and milestones service.
    pub fn issues(&self) -> IssuesService<'_> {
        IssuesService::new(self)
    }

    /// Gets the users service.
    pub fn users(&self) -> UsersService<'_> {
        UsersService::new(self)
    }

    /// Gets the GraphQL service.
    pub fn graphql(&self) -> GraphQLService<'_> {
        GraphQLService::new(self)
    }

    // HTTP methods

    /// Makes a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> GitHubResult<T> {
        self.request(Method::GET, path, Option::<&()>::None).await
    }

    /// Fetches one page of a list endpoint. `url` may be relative or a
    /// `Link` header URL.
    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> GitHubResult<Page<T>> {
        let response = self.execute_request(Method::GET, url, None).await?;
        let links = PaginationLinks::from_headers(response.headers());
        let items: Vec<T> = Self::decode(response).await?;
        Ok(Page::new(items, links))
    }

    /// Fetches every page of a list endpoint, following `Link: rel="next"`
    /// until it is absent.
    pub async fn get_all<T: DeserializeOwned, P: Serialize>(
        &self,
        path: &str,
        params: &P,
    ) -> GitHubResult<Vec<T>> {
        let mut next = Some(self.build_url_with_params(path, params)?);
        let mut items = Vec::new();
        let mut pages = 0u32;

        while let Some(url) = next.take() {
            let page = self.get_page::<T>(&url).await?;
            pages += 1;
            if let Some(last) = page.links.last_page() {
                tracing::trace!(path, page = pages, last, "Fetched page");
            }
            next = page.next_url().map(String::from);
            items.extend(page.into_items());
        }

        tracing::debug!(path, pages, items = items.len(), "Fetched all pages");
        Ok(items)
    }

    /// Makes a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> GitHubResult<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Makes a POST request without a response body.
    pub async fn post_no_response<B: Serialize>(&self, path: &str, body: &B) -> GitHubResult<()> {
        let body = Self::encode(body)?;
        self.execute_request(Method::POST, path, Some(body)).await?;
        Ok(())
    }

    /// Makes a DELETE request.
    pub async fn delete(&self, path: &str) -> GitHubResult<()> {
        self.execute_request(Method::DELETE, path, None).await?;
        Ok(())
    }

    // Internal methods

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> GitHubResult<T> {
        let body = body.map(Self::encode).transpose()?;
        let response = self.execute_request(method, path, body).await?;
        Self::decode(response).await
    }

    fn encode<B: Serialize>(body: &B) -> GitHubResult<Vec<u8>> {
        serde_json::to_vec(body).map_err(|e| {
            GitHubError::deserialization(format!("Failed to serialize request body: {}", e))
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> GitHubResult<T> {
        response.json().await.map_err(|e| {
            GitHubError::deserialization(format!("Failed to deserialize response: {}", e))
        })
    }

    /// Executes one logical call.
    ///
    /// A rate-limited response is retried once after the computed wait; a 401
    /// triggers one credential refresh and one retry. A retry that needs
    /// recovery again fails with `RateLimitExceeded` or
    /// `AuthenticationExpired`. Transport failures are never retried.
    pub async fn execute_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> GitHubResult<Response> {
        let url = self.build_url(path);

        if self.config.rate_limit.preemptive_throttling
            && self.rate_limit.wait_if_needed().await.is_some()
        {
            self.metrics.record_rate_limited();
        }

        let mut recovered = false;
        loop {
            let token = self.current_token().await?;
            let timer = RequestTimer::new(self.metrics.clone());
            TracingHooks::on_request_start(method.as_str(), &url);

            let response = match self.send(&method, &url, &token, body.as_deref()).await {
                Ok(response) => response,
                Err(e) => {
                    timer.failure();
                    TracingHooks::on_request_error(method.as_str(), &url, &e.to_string());
                    return Err(e);
                }
            };

            let status = response.status();
            let info = extract_rate_limit(response.headers());
            self.rate_limit.update(&info).await;
            TracingHooks::on_request_complete(method.as_str(), &url, status.as_u16(), timer.elapsed());

            match classify(status, &info, Utc::now()) {
                ResponseClass::Success => {
                    timer.success();
                    return Ok(response);
                }
                ResponseClass::RateLimited(wait) if !recovered && self.config.rate_limit.enabled => {
                    timer.failure();
                    self.metrics.record_rate_limited();
                    TracingHooks::on_rate_limited(method.as_str(), &url, wait);
                    sleep(wait).await;
                    recovered = true;
                }
                ResponseClass::RateLimited(_) => {
                    timer.failure();
                    return Err(GitHubError::rate_limit_exceeded(Some(info))
                        .with_status(status.as_u16()));
                }
                ResponseClass::Unauthorized if !recovered => {
                    timer.failure();
                    if !self.credentials.refresh().await {
                        return Err(GitHubError::authentication_expired(
                            "Credential rejected and could not be refreshed",
                        ));
                    }
                    let refreshed = self.credentials.access_token().await?;
                    *self.token.write().await = Some(refreshed);
                    self.metrics.record_refresh();
                    TracingHooks::on_auth_token_refresh();
                    recovered = true;
                }
                ResponseClass::Unauthorized => {
                    timer.failure();
                    return Err(GitHubError::authentication_expired(
                        "Credential rejected after recovery",
                    ));
                }
                ResponseClass::Failed => {
                    timer.failure();
                    return Err(Self::handle_error_response(response, info).await);
                }
            }
        }
    }

    async fn current_token(&self) -> GitHubResult<SecretString> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        let token = self.credentials.access_token().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        token: &SecretString,
        body: Option<&[u8]>,
    ) -> GitHubResult<Response> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", &self.config.api_version);

        if let Some(bytes) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(bytes.to_vec());
        }

        let request = request
            .build()
            .map_err(|e| GitHubError::transport(format!("Invalid request: {}", e)).with_cause(e))?;

        if tracing::enabled!(tracing::Level::TRACE) {
            for (name, value) in request.headers() {
                tracing::trace!(
                    header = %name,
                    value = %redact_header(name.as_str(), value.to_str().unwrap_or("<binary>")),
                    "Request header"
                );
            }
        }

        self.http.execute(request).await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request timed out: {}", e)
            } else if e.is_connect() {
                format!("Connection failed: {}", e)
            } else {
                format!("Request failed: {}", e)
            };
            GitHubError::transport(message).with_cause(e)
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    fn build_url_with_params<P: Serialize>(&self, path: &str, params: &P) -> GitHubResult<String> {
        let url = self.build_url(path);
        let query_string = serde_urlencoded::to_string(params).map_err(|e| {
            GitHubError::configuration(format!("Failed to serialize parameters: {}", e))
        })?;

        Ok(if query_string.is_empty() {
            url
        } else {
            format!("{}?{}", url, query_string)
        })
    }

    async fn handle_error_response(response: Response, rate_limit: RateLimitInfo) -> GitHubError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<GitHubErrorResponse>(&body) {
            Ok(parsed) => match parsed.documentation_url {
                Some(doc) => format!("{} ({})", parsed.message, doc),
                None => parsed.message,
            },
            Err(_) if body.is_empty() => format!("HTTP {} error", status),
            Err(_) => body,
        };

        GitHubError::api(status, message).with_rate_limit(rate_limit)
    }
}

/// Builder for GitHubClient.
pub struct GitHubClientBuilder {
    config_builder: GitHubConfigBuilder,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl GitHubClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: GitHubConfig::builder(),
            credentials: None,
        }
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the credential provider.
    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Uses a fixed token that cannot be refreshed.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.credentials(Arc::new(StaticCredentialProvider::new(token)))
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Sets the delay between issue deletions.
    pub fn delete_delay(mut self, delay: std::time::Duration) -> Self {
        self.config_builder = self.config_builder.delete_delay(delay);
        self
    }

    /// Disables the preemptive wait before calls.
    pub fn no_preemptive_throttling(mut self) -> Self {
        self.config_builder = self.config_builder.no_preemptive_throttling();
        self
    }

    /// Builds the client.
    pub fn build(self) -> GitHubResult<GitHubClient> {
        let config = self.config_builder.build()?;
        let credentials = self.credentials.ok_or_else(|| {
            GitHubError::new(GitHubErrorKind::MissingAuth, "Authentication required")
        })?;
        GitHubClient::new(config, credentials)
    }
}

impl Default for GitHubClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
