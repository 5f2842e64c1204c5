//! Drives lifecycle phases across the core and the optional installers.
//!
//! For every phase the core goes first; then the same phase fans out over
//! the optional installers as concurrent tokio tasks. All tasks of a phase
//! are awaited before the next phase starts, and the first failure ends the
//! run.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

use crate::context::Context;
use crate::error::{InstallError, Result};
use crate::installer::Installer;
use crate::version::Version;

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Prepare,
    Build,
    Install,
    Uninstall,
    Clean,
}

/// One step of the installer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Build,
    Install,
    Uninstall,
    Clean,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Build => "build",
            Phase::Install => "install",
            Phase::Uninstall => "uninstall",
            Phase::Clean => "clean",
        }
    }

    /// Whether the phase covers disabled installers too.
    pub fn covers_disabled(&self) -> bool {
        matches!(self, Phase::Uninstall | Phase::Clean)
    }

    async fn run_on(&self, installer: &dyn Installer, ctx: &Context) -> Result<()> {
        match self {
            Phase::Prepare => installer.prepare(ctx).await,
            Phase::Build => installer.build(ctx).await,
            Phase::Install => installer.install(ctx).await,
            Phase::Uninstall => installer.uninstall(ctx).await,
            Phase::Clean => installer.clean(ctx).await,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modifiers from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionFlags {
    /// Skip the clean phase after uninstall
    pub keep_build: bool,
    /// Drop the build phase from build/install
    pub skip_build: bool,
    /// After install, test the configuration and reload nginx
    pub reload: bool,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Prepare => "prepare",
            Action::Build => "build",
            Action::Install => "install",
            Action::Uninstall => "uninstall",
            Action::Clean => "clean",
        }
    }

    /// Phases this action runs, in order.
    pub fn phases(&self, flags: ActionFlags) -> Vec<Phase> {
        let mut phases = match self {
            Action::Prepare => vec![Phase::Prepare],
            Action::Build => vec![Phase::Prepare, Phase::Build],
            Action::Install => vec![Phase::Prepare, Phase::Build, Phase::Install],
            Action::Uninstall => vec![Phase::Uninstall, Phase::Clean],
            Action::Clean => vec![Phase::Clean],
        };
        if flags.skip_build {
            phases.retain(|p| *p != Phase::Build);
        }
        if flags.keep_build && *self == Action::Uninstall {
            phases.retain(|p| *p != Phase::Clean);
        }
        phases
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prepare" => Ok(Action::Prepare),
            "build" => Ok(Action::Build),
            "install" => Ok(Action::Install),
            "uninstall" => Ok(Action::Uninstall),
            "clean" => Ok(Action::Clean),
            other => Err(InstallError::ConfigValidation(format!("unknown action '{other}'"))),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub action: Action,
    pub phases: Vec<Phase>,
    /// nginx version picked during prepare, or read back from an already
    /// built tree. `None` for actions without prepare and for trees built
    /// before versions were recorded.
    pub nginx_version: Option<String>,
    pub configure_opts: Vec<String>,
    pub cc_opts: Vec<String>,
    /// Installers dropped by exclusion rules
    pub disabled: Vec<String>,
    pub reloaded: bool,
}

/// Runs actions over one [`Context`] and the full installer list.
pub struct Orchestrator {
    ctx: Arc<Context>,
    installers: Vec<Arc<dyn Installer>>,
}

impl Orchestrator {
    /// `installers` is the complete optional list, enabled or not.
    pub fn new(ctx: Arc<Context>, installers: Vec<Arc<dyn Installer>>) -> Self {
        Orchestrator { ctx, installers }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Run every phase of `action`.
    pub async fn run(&self, action: Action, flags: ActionFlags) -> Result<RunReport> {
        let phases = action.phases(flags);
        info!(action = %action, phases = ?phases, "starting");
        self.ctx.log_enabled(&self.ctx.enabled().await);

        for phase in &phases {
            self.run_phase(*phase)
                .instrument(info_span!("phase", phase = %phase))
                .await?;
        }

        let mut reloaded = false;
        if flags.reload && action == Action::Install {
            self.ctx.core().settings().reload(&self.ctx).await?;
            reloaded = true;
        }

        let core = self.ctx.core();
        Ok(RunReport {
            action,
            phases,
            nginx_version: core.resolved_version().await.as_ref().map(Version::to_string),
            configure_opts: core.configure_opts().await,
            cc_opts: core.cc_opts().await,
            disabled: self.ctx.disabled().await,
            reloaded,
        })
    }

    /// Core first, then the optional installers concurrently.
    pub async fn run_phase(&self, phase: Phase) -> Result<()> {
        let core = self.ctx.core().settings_arc();
        phase.run_on(core.as_ref(), &self.ctx).await?;

        // Snapshot after the core ran: its prepare may have disabled some.
        let targets = if phase.covers_disabled() {
            self.installers.clone()
        } else {
            self.ctx.enabled().await
        };

        let mut tasks = JoinSet::new();
        for installer in targets {
            let ctx = Arc::clone(&self.ctx);
            let tag = installer.tag();
            tasks.spawn(
                async move { phase.run_on(installer.as_ref(), &ctx).await }
                    .instrument(info_span!("installer", installer = tag)),
            );
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| InstallError::Task(e.to_string())).and_then(|r| r);
            if let Err(e) = outcome {
                error!(phase = %phase, error = %e, "installer failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_phases() {
        let none = ActionFlags::default();
        assert_eq!(Action::Prepare.phases(none), vec![Phase::Prepare]);
        assert_eq!(Action::Build.phases(none), vec![Phase::Prepare, Phase::Build]);
        assert_eq!(
            Action::Install.phases(none),
            vec![Phase::Prepare, Phase::Build, Phase::Install]
        );
        assert_eq!(Action::Uninstall.phases(none), vec![Phase::Uninstall, Phase::Clean]);
        assert_eq!(Action::Clean.phases(none), vec![Phase::Clean]);
    }

    #[test]
    fn test_action_flags() {
        let skip = ActionFlags {
            skip_build: true,
            ..Default::default()
        };
        assert_eq!(Action::Install.phases(skip), vec![Phase::Prepare, Phase::Install]);

        let keep = ActionFlags {
            keep_build: true,
            ..Default::default()
        };
        assert_eq!(Action::Uninstall.phases(keep), vec![Phase::Uninstall]);
        // Clean runs when explicitly asked for.
        assert_eq!(Action::Clean.phases(keep), vec![Phase::Clean]);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("Install".parse::<Action>().unwrap(), Action::Install);
        assert!("deploy".parse::<Action>().is_err());
    }
}
