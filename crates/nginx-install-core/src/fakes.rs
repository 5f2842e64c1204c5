//! In-memory capability fakes (testing only)
//!
//! `RecordingRunner`, `FakeDownloader` and `FakeGitClient` satisfy the
//! capability traits without touching the network or spawning processes,
//! and count every call so tests can assert on idempotence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::context::{Capabilities, Context, RunOptions};
use crate::download::Downloader;
use crate::error::{InstallError, Result};
use crate::exec::{CommandOutput, CommandSpec, ProcessRunner};
use crate::git::GitClient;
use crate::installer::{CoreInstaller, Installer};
use crate::progress::NullProgress;

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FailRule {
    pattern: String,
    exit_code: i32,
    stderr: String,
}

/// Records every command and answers with success unless a rule says
/// otherwise.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<FailRule>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose line contains `pattern` exit with `exit_code`.
    pub fn fail_on(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.rules.lock().unwrap().push(FailRule {
            pattern: pattern.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.line).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Whether any recorded line contains `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| spec.line.contains(&r.pattern))
            .cloned();
        Ok(match rule {
            Some(rule) => CommandOutput {
                command: spec.line.clone(),
                exit_code: rule.exit_code,
                stdout: String::new(),
                stderr: rule.stderr,
            },
            None => CommandOutput::skipped(spec.line.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeDownloader
// ---------------------------------------------------------------------------

/// Serves canned pages; "downloads" write a small placeholder file.
#[derive(Debug, Default)]
pub struct FakeDownloader {
    pages: Mutex<HashMap<String, String>>,
    fetched: Mutex<Vec<(String, PathBuf)>>,
    page_hits: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    /// `(url, dest)` of every file download.
    pub fn fetched(&self) -> Vec<(String, PathBuf)> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn page_hits(&self) -> Vec<String> {
        self.page_hits.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.fetched.lock().unwrap().len() + self.page_hits.lock().unwrap().len()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str, dest: &Path, _title: &str) -> Result<()> {
        self.fetched
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, b"fake archive").await?;
        Ok(())
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.page_hits.lock().unwrap().push(url.to_string());
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| InstallError::Network {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// FakeGitClient
// ---------------------------------------------------------------------------

/// "Clones" by creating the destination directory.
#[derive(Debug, Default)]
pub struct FakeGitClient {
    clones: Mutex<Vec<(String, PathBuf)>>,
    /// File names created inside every checkout
    files: Mutex<Vec<String>>,
}

impl FakeGitClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate each checkout with an empty `name`.
    pub fn with_file(self, name: &str) -> Self {
        self.files.lock().unwrap().push(name.to_string());
        self
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.clones.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.clones.lock().unwrap().len()
    }
}

#[async_trait]
impl GitClient for FakeGitClient {
    async fn clone_repo(&self, url: &str, dest: &Path, _user: Option<&str>) -> Result<()> {
        self.clones
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        tokio::fs::create_dir_all(dest).await?;
        let files = self.files.lock().unwrap().clone();
        for name in files {
            tokio::fs::write(dest.join(name), b"").await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A context wired to fresh fakes, with handles to inspect them.
#[derive(Debug)]
pub struct FakeHarness {
    pub runner: Arc<RecordingRunner>,
    pub downloader: Arc<FakeDownloader>,
    pub git: Arc<FakeGitClient>,
}

impl FakeHarness {
    pub fn new(downloader: FakeDownloader, git: FakeGitClient) -> Self {
        FakeHarness {
            runner: Arc::new(RecordingRunner::new()),
            downloader: Arc::new(downloader),
            git: Arc::new(git),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            runner: self.runner.clone(),
            downloader: self.downloader.clone(),
            git: self.git.clone(),
            progress: Arc::new(NullProgress),
        }
    }

    /// Context over `build_dir` with quiet output.
    pub fn context(
        &self,
        build_dir: &Path,
        core: CoreInstaller,
        installers: &[Arc<dyn Installer>],
    ) -> Arc<Context> {
        let opts = RunOptions {
            build_dir: build_dir.to_path_buf(),
            quiet: true,
            ..Default::default()
        };
        Arc::new(Context::new(opts, self.capabilities(), core, installers))
    }

    /// Calls made to all three fakes together.
    pub fn total_calls(&self) -> usize {
        self.runner.call_count() + self.downloader.call_count() + self.git.call_count()
    }
}
