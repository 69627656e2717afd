//! CLI-specific error types and exit code mapping

use layerfix_core::error::LayerfixError;
use layerfix_patcher::PatchError;
use layerfix_report::ReportError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The run completed but some packages or platforms were not patched.
    #[error("partial success: {0}")]
    Partial(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from layerfix-core.
    #[error("{0}")]
    Core(#[from] LayerfixError),

    /// Patch orchestration failure.
    #[error("{0}")]
    Patch(PatchError),

    /// Report parsing failure.
    #[error("{0}")]
    Report(ReportError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                          |
    /// |------|--------------------------------------------------|
    /// | 0    | Success                                          |
    /// | 1    | General / command error                          |
    /// | 2    | Configuration error                              |
    /// | 3    | Partial success (packages or platforms failed)   |
    /// | 10   | IO error                                         |
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Core(LayerfixError::Config(_)) => 2,
            Self::Partial(_) => 3,
            Self::Io(_) | Self::Core(LayerfixError::Io(_)) => 10,
            Self::Patch(e) => match e.root() {
                PatchError::Config { .. } => 2,
                PatchError::Io { .. } | PatchError::Report(ReportError::Io { .. }) => 10,
                _ => 1,
            },
            Self::Report(ReportError::Io { .. }) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) | Self::Report(_) => 1,
        }
    }
}

impl From<PatchError> for CliError {
    fn from(e: PatchError) -> Self {
        match e {
            PatchError::Config { field, reason } => Self::Config(format!("{field}: {reason}")),
            other => Self::Patch(other),
        }
    }
}

impl From<ReportError> for CliError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::UnknownScanner(_) => Self::Config(e.to_string()),
            other => Self::Report(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerfix_core::error::{ConfigError, DiscoveryError};
    use layerfix_pkgmgr::PkgMgrError;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");

        let core: CliError = LayerfixError::Config(ConfigError::ParseFailed {
            reason: "bad".to_owned(),
        })
        .into();
        assert_eq!(core.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_partial() {
        let err = CliError::Partial("1 package failed".to_owned());
        assert_eq!(err.exit_code(), 3, "partial success should return exit code 3");
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");

        let report: CliError = ReportError::Io {
            path: "r.json".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert_eq!(report.exit_code(), 10);
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1, "command error should return exit code 1");
    }

    #[test]
    fn test_patch_config_error_maps_to_config() {
        let err: CliError = PatchError::Config {
            field: "tag".to_owned(),
            reason: "invalid characters".to_owned(),
        }
        .into();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("tag: invalid characters"));
    }

    #[test]
    fn test_platform_failure_is_general_error_naming_platform() {
        let err: CliError = PatchError::from(PkgMgrError::PartialUpdateFailure {
            platform: "linux/arm64".to_owned(),
            packages: vec!["libssl3".to_owned()],
        })
        .for_platform("linux/arm64")
        .into();
        assert_eq!(err.exit_code(), 1);
        let msg = err.to_string();
        assert!(msg.contains("linux/arm64"));
        assert!(msg.contains("libssl3"));
    }

    #[test]
    fn test_unknown_scanner_is_config_error() {
        let err: CliError = ReportError::UnknownScanner("grype".to_owned()).into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_discovery_error_is_general() {
        let err: CliError = LayerfixError::Discovery(DiscoveryError::NotMultiPlatform(
            "docker.io/library/alpine:3.19".to_owned(),
        ))
        .into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("configuration error"));
        assert!(display_str.contains("invalid TOML syntax"));
    }
}
