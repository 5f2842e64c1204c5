//! Error taxonomy for nginx-install.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving, configuring, building or installing.
#[derive(Error, Debug)]
pub enum InstallError {
    /// No version in the release sheet satisfies the version spec
    #[error("no version matches spec '{spec}'")]
    Resolution { spec: String },

    /// The version spec could not be parsed
    #[error("invalid version spec '{spec}': {reason}")]
    InvalidVersionSpec { spec: String, reason: String },

    /// A shelled-out command exited with a non-zero status
    #[error("command `{command}` returned status {exit_code}")]
    ProcessExecution {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Download failed or the host could not be reached
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// The registry has no installer for this tag
    #[error("unknown installer type '{tag}' in namespace '{namespace}'")]
    UnknownInstallerType { namespace: String, tag: String },

    /// Strict clone target already exists
    #[error("{} already exists", path.display())]
    AlreadyExists { path: PathBuf },

    /// Malformed config file or installer record
    #[error("invalid config: {0}")]
    ConfigValidation(String),

    /// A release page did not contain the expected version listing
    #[error("failed to parse {source_name}: {reason}")]
    IndexParse { source_name: String, reason: String },

    /// The action needs root privileges
    #[error("`{action}` must be run as root (or use --dry)")]
    PrivilegeRequired { action: String },

    /// An installer task panicked or was aborted
    #[error("installer task failed: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for InstallError {
    fn from(err: serde_yaml::Error) -> Self {
        InstallError::ConfigValidation(err.to_string())
    }
}

impl InstallError {
    /// Full diagnostic text, including captured command output.
    pub fn detail(&self) -> String {
        match self {
            InstallError::ProcessExecution {
                command,
                exit_code,
                stdout,
                stderr,
            } => format!(
                "Command {command} returned status {exit_code}, error: {stderr}, output: {stdout}"
            ),
            other => other.to_string(),
        }
    }
}

/// Result type for nginx-install operations
pub type Result<T> = std::result::Result<T, InstallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_detail_carries_output() {
        let err = InstallError::ProcessExecution {
            command: "make".to_string(),
            exit_code: 2,
            stdout: "compiling".to_string(),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "command `make` returned status 2");
        let detail = err.detail();
        assert!(detail.contains("boom"));
        assert!(detail.contains("compiling"));
    }

    #[test]
    fn test_yaml_error_maps_to_config_validation() {
        let err: InstallError = serde_yaml::from_str::<u32>("not a number")
            .unwrap_err()
            .into();
        assert!(matches!(err, InstallError::ConfigValidation(_)));
    }
}
