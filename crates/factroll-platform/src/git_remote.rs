//! `SourceControl` backed by the `git` CLI.
//!
//! Works against a local clone whose remote hosts the control repository.
//! Every operation is a single `git push`, so the remote is the only state
//! that matters; the clone only needs to contain the revisions being pushed.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::PlatformError;
use crate::platform_traits::{PlatformResult, SourceControl};

/// Branch operations on a git remote.
#[derive(Debug, Clone)]
pub struct GitRemote {
    repo_dir: PathBuf,
    remote: String,
}

impl GitRemote {
    /// Use `repo_dir` as the working clone and push to `origin`.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: "origin".to_string(),
        }
    }

    pub fn with_remote(mut self, remote: &str) -> Self {
        self.remote = remote.to_string();
        self
    }

    async fn git(&self, args: &[&str]) -> PlatformResult<String> {
        debug!(repo = %self.repo_dir.display(), ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlatformError::Command(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::Command(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve `name` on the remote, if it exists.
    pub async fn remote_branch_sha(&self, branch: &str) -> PlatformResult<Option<String>> {
        let refname = format!("refs/heads/{branch}");
        let out = self
            .git(&["ls-remote", "--heads", &self.remote, &refname])
            .await?;
        Ok(out
            .lines()
            .find(|line| line.ends_with(&refname))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string))
    }
}

#[async_trait]
impl SourceControl for GitRemote {
    async fn create_branch(
        &self,
        branch: &str,
        revision: &str,
        from_existing: bool,
    ) -> PlatformResult<()> {
        if self.remote_branch_sha(branch).await?.is_some() {
            return Err(PlatformError::Rejected(format!(
                "branch {branch} already exists on {}",
                self.remote
            )));
        }
        let source = if from_existing {
            self.remote_branch_sha(revision)
                .await?
                .ok_or_else(|| PlatformError::NotFound {
                    kind: "branch".to_string(),
                    id: revision.to_string(),
                })?
        } else {
            revision.to_string()
        };
        let refspec = format!("{source}:refs/heads/{branch}");
        self.git(&["push", &self.remote, &refspec]).await?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> PlatformResult<()> {
        self.git(&["push", &self.remote, "--delete", branch])
            .await
            .map(|_| ())
    }

    async fn update_branch_ref(&self, branch: &str, revision: &str) -> PlatformResult<()> {
        let refspec = format!("+{revision}:refs/heads/{branch}");
        self.git(&["push", &self.remote, &refspec]).await.map(|_| ())
    }
}
