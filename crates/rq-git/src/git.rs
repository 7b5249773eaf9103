use crate::backend::{CommitInfo, GitBackend, GitError};
use crate::worktree::{Worktree, worktree_dir};
use chrono::{TimeZone, Utc};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Git backend that reads with gix and shells out to the `git` binary for
/// worktree, diff, apply and commit, whose gix APIs are not stable yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }
}

impl GitBackend for GitCli {
    fn repo_root(&self, path: &Path) -> Result<PathBuf, GitError> {
        let repo = open_repo(path)?;
        let workdir = repo.workdir().ok_or_else(|| GitError::BackendError {
            reason: "bare repository".to_string(),
        })?;
        canonical(workdir)
    }

    fn main_repo_root(&self, path: &Path) -> Result<PathBuf, GitError> {
        let repo = open_repo(path)?;
        let common = repo.common_dir();
        if common.file_name().is_some_and(|name| name == ".git") {
            if let Some(parent) = common.parent() {
                return canonical(parent);
            }
        }
        self.repo_root(path)
    }

    fn resolve_sha(&self, repo: &Path, rev: &str) -> Result<String, GitError> {
        let rev = rev.trim();
        if rev.is_empty() || rev.starts_with('-') {
            return Err(GitError::RefNotFound {
                name: rev.to_string(),
            });
        }
        let repository = open_repo(repo)?;
        let id = repository
            .rev_parse_single(rev)
            .map_err(|_| GitError::RefNotFound {
                name: rev.to_string(),
            })?;
        let object = id.object().map_err(|_| GitError::RefNotFound {
            name: rev.to_string(),
        })?;
        let commit = object.peel_to_commit().map_err(|_| GitError::RefNotFound {
            name: rev.to_string(),
        })?;
        Ok(commit.id.to_string())
    }

    fn commit_info(&self, repo: &Path, sha: &str) -> Result<CommitInfo, GitError> {
        let output = run_git(
            repo,
            &["show", "-s", "--format=%H%x00%an%x00%s%x00%ct", sha],
        )?;
        let mut fields = output.trim_end().splitn(4, '\0');
        let (Some(sha), Some(author), Some(subject), Some(ct)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(GitError::BackendError {
                reason: format!("unexpected git show output: {output}"),
            });
        };
        let seconds: i64 = ct.trim().parse().map_err(|_| GitError::BackendError {
            reason: format!("invalid commit time: {ct}"),
        })?;
        let timestamp = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| GitError::BackendError {
                reason: format!("invalid commit time: {ct}"),
            })?;
        Ok(CommitInfo {
            sha: sha.to_string(),
            author: author.to_string(),
            subject: subject.to_string(),
            timestamp,
        })
    }

    fn create_worktree(&self, repo: &Path, sha: &str) -> Result<Worktree, GitError> {
        let path = worktree_dir();
        let path_arg = path.to_string_lossy().to_string();
        run_git(repo, &["worktree", "add", "--detach", &path_arg, sha])?;
        Ok(Worktree::new(repo.to_path_buf(), path))
    }

    fn capture_patch(&self, worktree: &Path, base_sha: &str) -> Result<String, GitError> {
        run_git(worktree, &["add", "-A"])?;
        run_git(worktree, &["diff", "--cached", "--binary", base_sha])
    }

    fn staged_paths(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let output = run_git(repo, &["diff", "--cached", "--name-only", "-z"])?;
        Ok(output
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    fn check_patch(&self, repo: &Path, patch: &str) -> Result<(), GitError> {
        run_git_with_input(repo, &["apply", "--check", "--index", "-"], patch)
            .map_err(does_not_apply)?;
        let numstat = run_git_with_input(repo, &["apply", "--numstat", "-z", "-"], patch)
            .map_err(does_not_apply)?;
        let staged = self.staged_paths(repo)?;
        if let Some(path) = parse_numstat(&numstat)
            .into_iter()
            .find(|path| staged.contains(path))
        {
            return Err(GitError::PatchDoesNotApply {
                reason: format!("{path} has staged changes"),
            });
        }
        Ok(())
    }

    fn apply_patch(&self, repo: &Path, patch: &str) -> Result<(), GitError> {
        run_git_with_input(repo, &["apply", "--index", "-"], patch).map_err(does_not_apply)?;
        Ok(())
    }

    fn commit_paths(&self, repo: &Path, paths: &[String], message: &str) -> Result<String, GitError> {
        if paths.is_empty() {
            return Err(GitError::NothingToCommit);
        }
        let mut args = vec!["diff", "--cached", "--name-only", "--"];
        args.extend(paths.iter().map(String::as_str));
        if run_git(repo, &args)?.trim().is_empty() {
            return Err(GitError::NothingToCommit);
        }
        // --no-gpg-sign keeps unattended commits from blocking on an agent.
        let mut args = vec!["commit", "--no-gpg-sign", "-m", message, "--"];
        args.extend(paths.iter().map(String::as_str));
        run_git(repo, &args)?;
        let sha = run_git(repo, &["rev-parse", "HEAD"])?;
        Ok(sha.trim().to_string())
    }
}

fn does_not_apply(err: GitError) -> GitError {
    match err {
        GitError::CommandFailed { stderr, .. } => GitError::PatchDoesNotApply { reason: stderr },
        other => other,
    }
}

/// Paths named by `git apply --numstat -z`; a rename is listed under its new name.
fn parse_numstat(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter_map(|entry| entry.splitn(3, '\t').nth(2))
        .filter(|path| !path.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn open_repo(path: &Path) -> Result<gix::Repository, GitError> {
    gix::discover(path).map_err(|_| GitError::RepoNotFound {
        path: path.display().to_string(),
    })
}

fn canonical(path: &Path) -> Result<PathBuf, GitError> {
    std::fs::canonicalize(path).map_err(|err| GitError::BackendError {
        reason: format!("canonicalize {}: {err}", path.display()),
    })
}

pub(crate) fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|err| GitError::BackendError {
            reason: format!("failed to run git {}: {err}", args.join(" ")),
        })?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn run_git_with_input(dir: &Path, args: &[&str], input: &str) -> Result<String, GitError> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| GitError::BackendError {
            reason: format!("failed to run git {}: {err}", args.join(" ")),
        })?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .map_err(|err| GitError::BackendError {
                reason: format!("write git stdin: {err}"),
            })?;
    }
    let output = child
        .wait_with_output()
        .map_err(|err| GitError::BackendError {
            reason: format!("wait for git: {err}"),
        })?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
