pub mod backend;
pub mod git;
pub mod worktree;

#[cfg(any(test, feature = "test-support"))]
pub mod testutil;

pub use crate::backend::{CommitInfo, GitBackend, GitError};
pub use crate::git::GitCli;
pub use crate::worktree::Worktree;
