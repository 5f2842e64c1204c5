//! Tracing setup for the `nginx-install` binary.
//!
//! Every action writes a log file under `<build_dir>/logs/`. Terminal output
//! is opt-in through `logging.console` and always off with `--quiet`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::Result;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where and how to log for one run.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// No log file when unset
    pub log_dir: Option<PathBuf>,
    pub level: String,
    pub format: LogFormat,
    pub console: bool,
}

impl TelemetryOptions {
    /// Options from the config's `logging` section. `verbose` forces debug.
    pub fn from_config(
        logging: &LoggingConfig,
        build_dir: &Path,
        verbose: bool,
        quiet: bool,
    ) -> Self {
        TelemetryOptions {
            log_dir: Some(build_dir.join("logs")),
            level: if verbose {
                "debug".to_string()
            } else {
                logging.level.to_ascii_lowercase()
            },
            format: logging.format.clone(),
            console: logging.console && !quiet,
        }
    }

    /// Terminal only, for commands that have no build directory.
    pub fn console_only(verbose: bool, quiet: bool) -> Self {
        TelemetryOptions {
            log_dir: None,
            level: if verbose { "debug" } else { "warn" }.to_string(),
            format: LogFormat::Compact,
            console: !quiet,
        }
    }
}

fn format_layer<W>(format: &LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi).with_target(false);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full | LogFormat::Other(_) => layer.boxed(),
    }
}

/// Name of the log file for a run started now.
pub fn log_file_name() -> String {
    format!("nginx-install-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"))
}

/// Install the global subscriber and return the log file path, if any.
///
/// Respects `RUST_LOG`; otherwise uses `options.level`. Only the first call
/// in a process installs anything.
pub fn init_tracing(options: &TelemetryOptions) -> Result<Option<PathBuf>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut path = None;
    if let Some(dir) = &options.log_dir {
        std::fs::create_dir_all(dir)?;
        let file_path = dir.join(log_file_name());
        let file = Arc::new(File::create(&file_path)?);
        layers.push(format_layer(&options.format, file, false));
        path = Some(file_path);
    }
    if options.console {
        layers.push(format_layer(&options.format, std::io::stderr, true));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .ok();

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let logging = LoggingConfig {
            console: true,
            ..Default::default()
        };
        let opts = TelemetryOptions::from_config(&logging, Path::new("/b"), false, false);
        assert_eq!(opts.level, "info");
        assert_eq!(opts.log_dir, Some(PathBuf::from("/b/logs")));
        assert!(opts.console);

        let opts = TelemetryOptions::from_config(&logging, Path::new("/b"), true, true);
        assert_eq!(opts.level, "debug");
        assert!(!opts.console);

        let console = TelemetryOptions::console_only(false, false);
        assert!(console.log_dir.is_none());
        assert!(console.console);
    }

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = TelemetryOptions {
            log_dir: Some(dir.path().join("logs")),
            level: "info".to_string(),
            format: LogFormat::Json,
            console: false,
        };
        let path = init_tracing(&opts).unwrap().unwrap();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("nginx-install-"));
    }
}
