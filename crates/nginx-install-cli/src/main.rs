//! nginx-install - build and install nginx from source
//!
//! ## Commands
//!
//! - `prepare`, `build`, `install`, `uninstall`, `clean`: run an action over
//!   the core and the enabled installers of a config file
//! - `gen-config`: write a config file, enabling the named modules
//! - `modules`: print `load_module` lines for the enabled dynamic modules

mod ownership;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};

use nginx_install_core::config::DEFAULT_CONFIG_PATH;
use nginx_install_core::{
    check_privileges, init_tracing, load_module_lines, Action, ActionFlags, Capabilities,
    CliGitClient, Config, ConfigStore, Context, Flavor, HttpDownloader, IndicatifProgress,
    InstallError, Installer, Orchestrator, ProcessRunner, ProgressSink, Registry, RunOptions,
    ShellRunner, TelemetryOptions, YamlConfigStore,
};

#[derive(Parser)]
#[command(name = "nginx-install")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and install nginx with third-party modules from source", long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print debug information and every command issued
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output unless an error occurs
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Directory to build in (a new temporary directory when omitted)
    build_dir: Option<PathBuf>,

    /// Print the commands that would run instead of running them
    #[arg(long)]
    dry: bool,

    /// Keep the build directory after uninstall
    #[arg(long)]
    keep_build: bool,

    /// Skip the build step
    #[arg(long)]
    no_build: bool,

    /// Test the configuration and reload nginx after install
    #[arg(long)]
    reload: bool,

    /// User that owns the build directory
    #[arg(long, env = "SUDO_USER")]
    user: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn flags(&self) -> ActionFlags {
        ActionFlags {
            keep_build: self.keep_build,
            skip_build: self.no_build,
            reload: self.reload,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources and resolve versions
    Prepare(RunArgs),
    /// Prepare, then configure and compile
    Build(RunArgs),
    /// Prepare, build and install nginx with its service unit
    Install(RunArgs),
    /// Remove installed files, then the build directory
    Uninstall(RunArgs),
    /// Remove the build directory
    Clean(RunArgs),

    /// Write a config file
    GenConfig {
        /// Output file
        output: PathBuf,

        /// Modules to enable (by installer name, `all` for every module)
        mods: Vec<String>,

        /// Start from this config instead of the defaults
        #[arg(long)]
        source: Option<PathBuf>,

        /// nginx version spec
        #[arg(long, default_value = "mainline")]
        nginx_version: String,

        /// Build modules as dynamic modules
        #[arg(long)]
        dynamic: bool,

        /// Build OpenResty instead of vanilla nginx
        #[arg(long)]
        openresty: bool,
    },

    /// Print load_module lines for the enabled dynamic modules
    Modules,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Prepare(args) => cmd_run(&cli, Action::Prepare, args).await,
        Commands::Build(args) => cmd_run(&cli, Action::Build, args).await,
        Commands::Install(args) => cmd_run(&cli, Action::Install, args).await,
        Commands::Uninstall(args) => cmd_run(&cli, Action::Uninstall, args).await,
        Commands::Clean(args) => cmd_run(&cli, Action::Clean, args).await,
        Commands::GenConfig {
            output,
            mods,
            source,
            nginx_version,
            dynamic,
            openresty,
        } => {
            init_console(&cli);
            cmd_gen_config(
                output,
                mods,
                source.as_deref(),
                nginx_version,
                *dynamic,
                *openresty,
            )
            .await
        }
        Commands::Modules => {
            init_console(&cli);
            cmd_modules(&cli.config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_console(cli: &Cli) {
    // Console-only logging cannot fail on IO.
    let _ = init_tracing(&TelemetryOptions::console_only(cli.verbose, cli.quiet));
}

async fn load_config(path: &Path) -> Result<Config> {
    let store = YamlConfigStore::new(path);
    if !store.exists().await {
        bail!(
            "config file {} does not exist, create one with `nginx-install gen-config {}`",
            path.display(),
            path.display()
        );
    }
    store
        .load(&Registry::builtin())
        .await
        .with_context(|| format!("failed to load config {}", path.display()))
}

fn resolve_build_dir(action: Action, args: &RunArgs) -> Result<PathBuf> {
    match &args.build_dir {
        Some(dir) => {
            if !args.dry {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            Ok(dir.clone())
        }
        None if action == Action::Clean => bail!("clean needs a build directory"),
        None => {
            let dir = tempfile::Builder::new()
                .prefix("nginx-install-")
                .tempdir()
                .context("failed to create a temporary build directory")?;
            Ok(dir.into_path())
        }
    }
}

fn capabilities(config: &Config, quiet: bool) -> Result<Capabilities> {
    let progress: Arc<dyn ProgressSink> = if quiet {
        Arc::new(IndicatifProgress::hidden())
    } else {
        Arc::new(IndicatifProgress::new())
    };
    let runner: Arc<dyn ProcessRunner> = Arc::new(ShellRunner::new());
    let downloader = HttpDownloader::from_config(&config.network)
        .context("failed to set up the HTTP client")?
        .with_progress(Arc::clone(&progress));
    Ok(Capabilities {
        git: Arc::new(CliGitClient::new(Arc::clone(&runner))),
        runner,
        downloader: Arc::new(downloader),
        progress,
    })
}

/// Run one lifecycle action.
async fn cmd_run(cli: &Cli, action: Action, args: &RunArgs) -> Result<()> {
    let config = load_config(&cli.config).await?;
    let build_dir = resolve_build_dir(action, args)?;

    let telemetry =
        TelemetryOptions::from_config(&config.logging, &build_dir, cli.verbose, cli.quiet);
    let log_path = init_tracing(&telemetry).context("failed to set up logging")?;
    info!(action = %action, build_dir = %build_dir.display(), "nginx-install starting");
    debug!(installers = ?config.installers, "all extra installers in config");

    check_privileges(action, args.dry, ownership::is_root())?;

    let caps = capabilities(&config, cli.quiet)?;
    let opts = RunOptions {
        build_dir: build_dir.clone(),
        dry_run: args.dry,
        verbose: cli.verbose,
        quiet: cli.quiet,
        user: args.user.clone(),
    };
    let installers: Vec<Arc<dyn Installer>> =
        config.installers.into_iter().map(Arc::from).collect();
    let ctx = Arc::new(Context::new(opts, caps, config.core, &installers));
    let orchestrator = Orchestrator::new(ctx, installers);

    let result = orchestrator.run(action, args.flags()).await;

    if let Err(e) = ownership::restore_owner(&build_dir, args.user.as_deref()) {
        warn!(error = %format!("{e:#}"), "failed to restore build directory ownership");
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            report_failure(action, &e, log_path.as_deref());
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        println!("Completed {action} action");
    }
    Ok(())
}

/// Full detail goes to the log; the terminal gets the short form.
fn report_failure(action: Action, err: &InstallError, log_path: Option<&Path>) {
    error!(action = %action, detail = %err.detail(), "action failed");
    if let Some(path) = log_path {
        eprintln!("Full log: {}", path.display());
    }
}

/// Write a config file with the named modules enabled.
async fn cmd_gen_config(
    output: &Path,
    mods: &[String],
    source: Option<&Path>,
    nginx_version: &str,
    dynamic: bool,
    openresty: bool,
) -> Result<()> {
    let mut config = match source {
        Some(path) => load_config(path).await?,
        None => Config::default(),
    };
    config.logging.console = true;
    config.logging.level = "DEBUG".to_string();
    config.core.nginx_version = nginx_version.to_string();
    if openresty {
        config.core.flavor = Flavor::Openresty;
    }
    config.enable_named(mods, dynamic);

    let enabled: Vec<String> = config.enabled_installers().map(|i| i.label()).collect();
    info!(enabled = ?enabled, "generated config");

    YamlConfigStore::new(output)
        .save(&config)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Config file {} created", output.display());
    Ok(())
}

/// Print `load_module` lines for a config.
async fn cmd_modules(config_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    for line in load_module_lines(&config.core.modules_path, config.enabled_installers()) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "nginx-install",
            "install",
            "/tmp/build",
            "--dry",
            "--no-build",
            "--reload",
            "-c",
            "custom.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.build_dir, Some(PathBuf::from("/tmp/build")));
        let flags = args.flags();
        assert!(flags.skip_build && flags.reload && !flags.keep_build);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["nginx-install", "-q", "--verbose", "prepare"]).is_err());
    }

    #[test]
    fn test_clean_needs_build_dir() {
        assert!(resolve_build_dir(Action::Clean, &RunArgs::default()).is_err());
        let dir = resolve_build_dir(Action::Prepare, &RunArgs::default()).unwrap();
        assert!(dir.exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_gen_config_then_modules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        cmd_gen_config(
            &path,
            &["brotli".to_string(), "zlib".to_string()],
            None,
            "1.26",
            true,
            false,
        )
        .await
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.core.nginx_version, "1.26");
        assert!(config.logging.console);
        let enabled: Vec<&str> = config.enabled_installers().map(|i| i.tag()).collect();
        assert_eq!(enabled, vec!["BrotliInstaller", "ZlibInstaller"]);

        let lines = load_module_lines(&config.core.modules_path, config.enabled_installers());
        assert_eq!(lines.len(), 2);
        cmd_modules(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_config_suggests_gen_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gen-config"));
    }
}
