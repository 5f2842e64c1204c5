//! Git checkouts of third-party module sources.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{shell_quote, CommandSpec, ProcessRunner};

/// Clones repositories.
#[async_trait]
pub trait GitClient: Send + Sync + std::fmt::Debug {
    /// Clone `url` into `dest`, running git as `user` when given.
    async fn clone_repo(&self, url: &str, dest: &Path, user: Option<&str>) -> Result<()>;
}

/// Runs the `git` binary through a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct CliGitClient {
    runner: Arc<dyn ProcessRunner>,
}

impl CliGitClient {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        CliGitClient { runner }
    }
}

/// Shell line for cloning `url` into `dest`.
pub fn clone_line(url: &str, dest: &Path) -> String {
    format!(
        "git clone --recurse-submodules {} {}",
        shell_quote(url),
        shell_quote(&dest.to_string_lossy())
    )
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_repo(&self, url: &str, dest: &Path, user: Option<&str>) -> Result<()> {
        // A private or mistyped URL must fail instead of waiting for credentials.
        let spec = CommandSpec::new(clone_line(url, dest))
            .env("GIT_TERMINAL_PROMPT", "0")
            .user(user.map(str::to_string));
        self.runner.run(&spec).await?.check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use std::path::PathBuf;

    #[test]
    fn test_clone_line_quotes_paths() {
        let line = clone_line(
            "https://github.com/openresty/headers-more-nginx-module.git",
            &PathBuf::from("/tmp/my build/headers-more"),
        );
        assert_eq!(
            line,
            "git clone --recurse-submodules https://github.com/openresty/headers-more-nginx-module.git '/tmp/my build/headers-more'"
        );
    }

    #[tokio::test]
    async fn test_clone_disables_prompts_and_runs_as_user() {
        let runner = Arc::new(RecordingRunner::new());
        let git = CliGitClient::new(runner.clone());
        git.clone_repo(
            "https://github.com/google/ngx_brotli.git",
            Path::new("/tmp/b/ngx_brotli"),
            Some("builder"),
        )
        .await
        .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].env,
            vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
        );
        assert_eq!(calls[0].user.as_deref(), Some("builder"));
    }
}
