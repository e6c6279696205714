//! Repository operations.

use crate::client::GitHubClient;
use crate::errors::GitHubResult;
use crate::pagination::PaginationParams;
use crate::types::Repository;
use serde::Serialize;

/// Service for repository operations.
pub struct RepositoriesService<'a> {
    client: &'a GitHubClient,
}

impl<'a> RepositoriesService<'a> {
    /// Creates a new repositories service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    /// Lists every repository the authenticated user can access.
    pub async fn list_for_authenticated_user(&self) -> GitHubResult<Vec<Repository>> {
        let params = ListReposParams {
            pagination: PaginationParams::per_page(self.client.config().bulk.page_size),
            sort: Some(RepoSort::FullName),
        };
        self.client
            .get_all("/user/repos", &params)
            .await
            .map_err(|e| e.with_context("list_repositories", "/user/repos"))
    }
}

/// Parameters for listing repositories.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListReposParams {
    /// Pagination.
    #[serde(flatten)]
    pub pagination: PaginationParams,
    /// Sort order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<RepoSort>,
}

/// Repository sort field.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoSort {
    /// Creation time.
    Created,
    /// Last update.
    Updated,
    /// Last push.
    Pushed,
    /// Owner/name.
    FullName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_repos_params() {
        let params = ListReposParams {
            pagination: PaginationParams::per_page(100),
            sort: Some(RepoSort::FullName),
        };
        assert_eq!(
            serde_urlencoded::to_string(&params).unwrap(),
            "per_page=100&sort=full_name"
        );
    }
}
