//! User operations.

use crate::client::GitHubClient;
use crate::errors::GitHubResult;
use crate::types::User;

/// Service for user operations.
pub struct UsersService<'a> {
    client: &'a GitHubClient,
}

impl<'a> UsersService<'a> {
    /// Creates a new users service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    /// Gets the authenticated user. Doubles as a token check.
    pub async fn get_authenticated(&self) -> GitHubResult<User> {
        self.client
            .get("/user")
            .await
            .map_err(|e| e.with_context("get_authenticated_user", "/user"))
    }
}
