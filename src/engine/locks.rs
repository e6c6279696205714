//! One bulk operation per repository at a time.

use super::RepoTarget;
use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

static PROCESS_LOCKS: OnceLock<Arc<Mutex<HashSet<String>>>> = OnceLock::new();

/// Registry of repositories with a running bulk operation.
///
/// [`RepositoryLocks::process`] (also the `Default`) is shared by every
/// engine in the process. [`RepositoryLocks::new`] creates a private one.
#[derive(Debug, Clone)]
pub struct RepositoryLocks {
    busy: Arc<Mutex<HashSet<String>>>,
}

impl Default for RepositoryLocks {
    fn default() -> Self {
        Self::process()
    }
}

impl RepositoryLocks {
    /// The registry shared by the whole process.
    pub fn process() -> Self {
        Self {
            busy: Arc::clone(PROCESS_LOCKS.get_or_init(Default::default)),
        }
    }

    /// Creates an empty registry, independent of the process one.
    pub fn new() -> Self {
        Self {
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks the repository busy until the guard drops.
    pub fn acquire(&self, target: &RepoTarget) -> GitHubResult<RepositoryGuard> {
        let key = target.key();
        if !self.entries().insert(key.clone()) {
            return Err(GitHubError::new(
                GitHubErrorKind::OperationInProgress,
                format!("A bulk operation is already running on {}", target),
            ));
        }
        Ok(RepositoryGuard {
            locks: self.clone(),
            key,
        })
    }

    /// Returns true while the repository is busy.
    pub fn is_locked(&self, target: &RepoTarget) -> bool {
        self.entries().contains(&target.key())
    }
}

/// Releases the repository on drop.
#[derive(Debug)]
pub struct RepositoryGuard {
    locks: RepositoryLocks,
    key: String,
}

impl Drop for RepositoryGuard {
    fn drop(&mut self) {
        self.locks.entries().remove(&self.key);
    }
}
