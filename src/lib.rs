//! # GitHub Importer
//!
//! Bulk import, export and clearing of GitHub milestones and issues:
//! - Resilient request executor with rate-limit backoff and one-shot token refresh
//! - REST resource client plus GraphQL for issue deletion
//! - JSON documents of milestones with their issues, tasks, labels and comments
//! - OAuth web flow with file-backed token storage
//! - Progress events and cooperative cancellation for long operations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use github_importer::{BulkEngine, GitHubClient, Operation, RepoTarget};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GitHubClient::builder()
//!         .token("ghp_xxxxxxxxxxxx")
//!         .build()?;
//!
//!     let engine = BulkEngine::new(Arc::new(client));
//!     let target = RepoTarget::new("octocat", "hello-world");
//!
//!     let summary = engine
//!         .import_file(&target, "milestones.json", &Operation::silent())
//!         .await?;
//!     println!("{} issues created", summary.issues_created);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Authentication
pub mod auth;

// HTTP client and transport
pub mod client;

// Pagination handling
pub mod pagination;

// API Services
pub mod services;

// Import/export documents
pub mod document;

// Bulk operations
pub mod engine;

// Resilience patterns
pub mod resilience;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{
    Credential, CredentialProvider, FileTokenStorage, OAuthCredentialProvider,
    StaticCredentialProvider, TokenStorage,
};
pub use client::{GitHubClient, GitHubClientBuilder};
pub use config::{GitHubConfig, GitHubConfigBuilder, OAuthAppConfig};
pub use document::ImportDocument;
pub use engine::{
    BulkEngine, BulkRequest, CancellationFlag, Operation, OperationSummary, ProgressEvent,
    RepoTarget,
};
pub use errors::{GitHubError, GitHubErrorKind, GitHubResult};
pub use pagination::{Page, PaginationLinks};
pub use services::GitHubApi;
pub use types::*;
