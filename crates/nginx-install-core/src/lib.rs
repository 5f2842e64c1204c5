//! nginx-install core library
//!
//! Builds nginx from source together with third-party modules. Installers
//! prepare their sources concurrently and feed configure options into the
//! core build; the orchestrator drives them phase by phase.

pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod git;
pub mod installer;
pub mod nginx_conf;
pub mod orchestrator;
pub mod privilege;
pub mod progress;
pub mod registry;
pub mod telemetry;
pub mod version;

pub use config::{Config, ConfigStore, LogFormat, LoggingConfig, NetworkConfig, YamlConfigStore};
pub use context::{Capabilities, Context, CoreHandle, RunOptions};
pub use download::{Downloader, HttpDownloader};
pub use error::{InstallError, Result};
pub use exec::{CommandOutput, CommandSpec, ProcessRunner, ShellRunner};
pub use git::{CliGitClient, GitClient};
pub use installer::{default_installers, CoreInstaller, Flavor, Installer, BUILTIN_NAMESPACE};
pub use nginx_conf::load_module_lines;
pub use orchestrator::{Action, ActionFlags, Orchestrator, Phase, RunReport};
pub use privilege::check_privileges;
pub use progress::{IndicatifProgress, NullProgress, ProgressSink};
pub use registry::{to_record, Registry};
pub use telemetry::{init_tracing, TelemetryOptions};
pub use version::{Version, VersionSheet, VersionSpec};
