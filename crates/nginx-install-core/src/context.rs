//! Shared run context handed to every installer phase.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::download::Downloader;
use crate::error::{InstallError, Result};
use crate::exec::{CommandOutput, CommandSpec, ProcessRunner};
use crate::git::GitClient;
use crate::installer::nginx::CoreInstaller;
use crate::installer::Installer;
use crate::progress::ProgressSink;
use crate::version::Version;

/// Per-invocation settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub build_dir: PathBuf,
    /// Log shell commands instead of running them
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
    /// The user that owns the build tree (usually `$SUDO_USER`)
    pub user: Option<String>,
}

/// The external collaborators a run talks to.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub runner: Arc<dyn ProcessRunner>,
    pub downloader: Arc<dyn Downloader>,
    pub git: Arc<dyn GitClient>,
    pub progress: Arc<dyn ProgressSink>,
}

/// The core installer's settings plus the option lists optional installers
/// append to while preparing.
#[derive(Debug)]
pub struct CoreHandle {
    settings: Arc<CoreInstaller>,
    configure_opts: Mutex<Vec<String>>,
    cc_opts: Mutex<Vec<String>>,
    resolved: Mutex<Option<Version>>,
}

impl CoreHandle {
    pub fn new(settings: CoreInstaller) -> Self {
        CoreHandle {
            configure_opts: Mutex::new(settings.configure_opts.clone()),
            cc_opts: Mutex::new(settings.cc_opts.clone()),
            resolved: Mutex::new(None),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &CoreInstaller {
        &self.settings
    }

    pub fn settings_arc(&self) -> Arc<CoreInstaller> {
        Arc::clone(&self.settings)
    }

    pub async fn push_configure_opt(&self, opt: impl Into<String>) {
        self.configure_opts.lock().await.push(opt.into());
    }

    pub async fn push_cc_opt(&self, opt: impl Into<String>) {
        self.cc_opts.lock().await.push(opt.into());
    }

    pub async fn configure_opts(&self) -> Vec<String> {
        self.configure_opts.lock().await.clone()
    }

    pub async fn cc_opts(&self) -> Vec<String> {
        self.cc_opts.lock().await.clone()
    }

    /// The nginx version picked by the core's `prepare`, if it ran.
    pub async fn resolved_version(&self) -> Option<Version> {
        self.resolved.lock().await.clone()
    }

    pub async fn set_resolved_version(&self, version: Version) {
        *self.resolved.lock().await = Some(version);
    }
}

/// State shared by the core and all optional installers for one run.
#[derive(Debug)]
pub struct Context {
    opts: RunOptions,
    caps: Capabilities,
    core: CoreHandle,
    enabled: RwLock<Vec<Arc<dyn Installer>>>,
    disabled: Mutex<Vec<String>>,
}

impl Context {
    /// Build a context. Only the enabled entries of `installers` join the
    /// enabled set.
    pub fn new(
        opts: RunOptions,
        caps: Capabilities,
        core: CoreInstaller,
        installers: &[Arc<dyn Installer>],
    ) -> Self {
        let enabled = installers
            .iter()
            .filter(|i| i.enabled())
            .cloned()
            .collect();
        Context {
            opts,
            caps,
            core: CoreHandle::new(core),
            enabled: RwLock::new(enabled),
            disabled: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.opts
    }

    pub fn build_dir(&self) -> &Path {
        &self.opts.build_dir
    }

    pub fn dry_run(&self) -> bool {
        self.opts.dry_run
    }

    pub fn user(&self) -> Option<&str> {
        self.opts.user.as_deref()
    }

    pub fn core(&self) -> &CoreHandle {
        &self.core
    }

    pub fn progress(&self) -> &dyn ProgressSink {
        self.caps.progress.as_ref()
    }

    pub fn nginx_src_dir(&self) -> PathBuf {
        self.opts.build_dir.join("nginx")
    }

    pub async fn has_core_built(&self) -> bool {
        let binary = self.nginx_src_dir().join("objs").join("nginx");
        tokio::fs::try_exists(binary).await.unwrap_or(false)
    }

    /// Print a message for the user unless running quietly.
    pub fn notify(&self, message: impl AsRef<str>) {
        if !self.opts.quiet {
            println!("{}", message.as_ref());
        }
    }

    /// Run a shell line. In dry mode the command is only announced.
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.run_inner(spec, false).await
    }

    /// Run a shell line even in dry mode (read-only probes).
    pub async fn run_in_dry(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.run_inner(spec, true).await
    }

    /// [`Context::run`] that fails on a non-zero exit.
    pub async fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.run(spec).await?.check()
    }

    async fn run_inner(&self, spec: CommandSpec, in_dry: bool) -> Result<CommandOutput> {
        if (self.opts.dry_run || self.opts.verbose) && !self.opts.quiet {
            println!("Issue command: {}", spec.line);
        }
        if self.opts.dry_run && !in_dry {
            debug!(command = %spec.line, "dry run, not executed");
            return Ok(CommandOutput::skipped(spec.line));
        }
        let spec = spec.echo(self.opts.verbose && !self.opts.quiet);
        self.caps.runner.run(&spec).await
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.caps.downloader.fetch_text(url).await
    }

    /// Download `url` to `dest`. Downloads happen in dry runs too.
    pub async fn download(&self, url: &str, dest: &Path, title: &str) -> Result<()> {
        self.caps.downloader.fetch(url, dest, title).await
    }

    /// Clone `url` into `dest`.
    ///
    /// An existing `dest` counts as already cloned and returns `Ok(false)`
    /// without touching git, unless `strict` is set, in which case it is
    /// an [`InstallError::AlreadyExists`].
    pub async fn git_clone(&self, url: &str, dest: &Path, strict: bool) -> Result<bool> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "already cloned");
            if strict {
                return Err(InstallError::AlreadyExists {
                    path: dest.to_path_buf(),
                });
            }
            return Ok(false);
        }
        if (self.opts.dry_run || self.opts.verbose) && !self.opts.quiet {
            println!("Issue command: {}", crate::git::clone_line(url, dest));
        }
        self.caps.git.clone_repo(url, dest, None).await?;
        Ok(true)
    }

    /// Snapshot of the enabled optional installers.
    pub async fn enabled(&self) -> Vec<Arc<dyn Installer>> {
        self.enabled.read().await.clone()
    }

    pub async fn is_enabled(&self, tag: &str) -> bool {
        self.enabled.read().await.iter().any(|i| i.tag() == tag)
    }

    /// Drop every enabled installer with `tag` from the run.
    pub async fn disable(&self, tag: &str, reason: &str) {
        let mut enabled = self.enabled.write().await;
        let before = enabled.len();
        enabled.retain(|i| i.tag() != tag);
        if enabled.len() != before {
            warn!(installer = tag, "{tag} is disabled because {reason}");
            self.disabled.lock().await.push(tag.to_string());
        }
    }

    /// Tags removed from the enabled set during this run.
    pub async fn disabled(&self) -> Vec<String> {
        self.disabled.lock().await.clone()
    }

    pub(crate) fn log_enabled(&self, installers: &[Arc<dyn Installer>]) {
        let labels: Vec<String> = installers.iter().map(|i| i.label()).collect();
        info!(enabled = ?labels, "enabled extra installers");
    }
}
