use crate::backend::GitError;
use crate::git::run_git;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_WORKTREE: AtomicU64 = AtomicU64::new(0);

/// A linked worktree that exists for as long as this guard lives.
///
/// `remove` reports failures; dropping the guard without calling it still
/// removes the worktree, best effort, so no exit path leaks one.
#[derive(Debug)]
pub struct Worktree {
    repo: PathBuf,
    path: PathBuf,
    removed: bool,
}

impl Worktree {
    pub fn new(repo: PathBuf, path: PathBuf) -> Self {
        Self {
            repo,
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn remove(mut self) -> Result<(), GitError> {
        self.removed = true;
        remove_worktree(&self.repo, &self.path)
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if !self.removed {
            let _ = remove_worktree(&self.repo, &self.path);
        }
    }
}

pub(crate) fn worktree_dir() -> PathBuf {
    let seq = NEXT_WORKTREE.fetch_add(1, Ordering::Relaxed);
    let stamp = chrono::Utc::now().timestamp_millis();
    std::env::temp_dir().join(format!("rq-worktree-{}-{stamp}-{seq}", std::process::id()))
}

fn remove_worktree(repo: &Path, path: &Path) -> Result<(), GitError> {
    let path_arg = path.to_string_lossy().to_string();
    if run_git(repo, &["worktree", "remove", "--force", &path_arg]).is_err() && path.exists() {
        std::fs::remove_dir_all(path).map_err(|err| GitError::BackendError {
            reason: format!("remove worktree {}: {err}", path.display()),
        })?;
    }
    let _ = run_git(repo, &["worktree", "prune"]);
    if path.exists() {
        return Err(GitError::BackendError {
            reason: format!("worktree still present: {}", path.display()),
        });
    }
    Ok(())
}
