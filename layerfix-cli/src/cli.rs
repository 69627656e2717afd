//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Layerfix -- patch vulnerable OS and application packages in container images.
///
/// Use `layerfix <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "layerfix", version, about, long_about = None)]
pub struct Cli {
    /// Path to the layerfix.toml configuration file.
    #[arg(short, long, default_value = "layerfix.toml", global = true)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// More log output on stderr (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Patch an image from a vulnerability report (file) or report directory.
    Patch(PatchArgs),

    /// List the platforms of an image and the reports that match them.
    Platforms(PlatformsArgs),

    /// Parse a vulnerability report and print the update manifest.
    Report(ReportArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- patch ----

/// Patch an image.
///
/// A report file patches one platform and commits one image. A report
/// directory patches every platform of a multi-platform image that has a
/// matching report and writes an OCI image layout.
#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Image reference to patch.
    #[arg(short, long)]
    pub image: String,

    /// Report file, or directory of per-platform reports.
    #[arg(short, long)]
    pub report: PathBuf,

    /// Where to write the OCI layout (report directory only).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Tag for the patched image (default: <tag>-<suffix>).
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Keep going when individual packages fail to update.
    #[arg(long)]
    pub ignore_errors: bool,

    /// Keep the original image for a failed platform instead of aborting the run.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Write an OpenVEX document for the updated packages.
    #[arg(long)]
    pub vex: Option<PathBuf>,

    /// Report format (trivy, native).
    #[arg(long)]
    pub scanner: Option<String>,

    /// Platform of a single report (default: taken from the report).
    #[arg(long)]
    pub platform: Option<String>,
}

// ---- platforms ----

/// Discover the platforms of an image.
#[derive(Args, Debug)]
pub struct PlatformsArgs {
    /// Image reference.
    #[arg(short, long)]
    pub image: String,

    /// Directory of per-platform reports to match against.
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Report format (trivy, native).
    #[arg(long)]
    pub scanner: Option<String>,
}

// ---- report ----

/// Parse one report.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Report file.
    pub path: PathBuf,

    /// Report format (trivy, native).
    #[arg(long)]
    pub scanner: Option<String>,
}

// ---- config ----

/// Manage layerfix configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, engine, patch, registry, debian, node).
        #[arg(long)]
        section: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_patch_minimal() {
        let cli = Cli::try_parse_from([
            "layerfix",
            "patch",
            "--image",
            "nginx:1.25",
            "--report",
            "report.json",
        ])
        .expect("parse succeeded");
        match cli.command {
            Commands::Patch(args) => {
                assert_eq!(args.image, "nginx:1.25");
                assert_eq!(args.report, PathBuf::from("report.json"));
                assert!(args.output_dir.is_none());
                assert!(args.tag.is_none());
                assert!(!args.ignore_errors);
                assert!(!args.continue_on_error);
                assert!(args.vex.is_none());
                assert!(args.scanner.is_none());
            }
            _ => panic!("expected Patch command"),
        }
    }

    #[test]
    fn test_cli_parse_patch_all_flags() {
        let cli = Cli::try_parse_from([
            "layerfix",
            "patch",
            "-i",
            "ghcr.io/acme/app:2",
            "-r",
            "reports/",
            "--output-dir",
            "out",
            "-t",
            "2024-06",
            "--ignore-errors",
            "--continue-on-error",
            "--vex",
            "app.vex.json",
            "--scanner",
            "native",
        ])
        .expect("parse succeeded");
        match cli.command {
            Commands::Patch(args) => {
                assert_eq!(args.output_dir, Some(PathBuf::from("out")));
                assert_eq!(args.tag.as_deref(), Some("2024-06"));
                assert!(args.ignore_errors);
                assert!(args.continue_on_error);
                assert_eq!(args.vex, Some(PathBuf::from("app.vex.json")));
                assert_eq!(args.scanner.as_deref(), Some("native"));
            }
            _ => panic!("expected Patch command"),
        }
    }

    #[test]
    fn test_cli_parse_patch_requires_image_and_report() {
        assert!(Cli::try_parse_from(["layerfix", "patch", "--image", "nginx"]).is_err());
        assert!(Cli::try_parse_from(["layerfix", "patch", "--report", "r.json"]).is_err());
    }

    #[test]
    fn test_cli_parse_platforms() {
        let cli = Cli::try_parse_from([
            "layerfix",
            "platforms",
            "--image",
            "debian:12",
            "--report-dir",
            "reports",
        ])
        .expect("parse succeeded");
        match cli.command {
            Commands::Platforms(args) => {
                assert_eq!(args.image, "debian:12");
                assert_eq!(args.report_dir, Some(PathBuf::from("reports")));
            }
            _ => panic!("expected Platforms command"),
        }
    }

    #[test]
    fn test_cli_parse_report() {
        let cli = Cli::try_parse_from(["layerfix", "report", "scan.json", "--scanner", "trivy"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Report(args) => {
                assert_eq!(args.path, PathBuf::from("scan.json"));
                assert_eq!(args.scanner.as_deref(), Some("trivy"));
            }
            _ => panic!("expected Report command"),
        }
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["layerfix", "config", "show", "--section", "patch"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Config(config_args) => match config_args.action {
                ConfigAction::Show { section } => {
                    assert_eq!(section, Some("patch".to_owned()));
                }
                _ => panic!("expected Show action"),
            },
            _ => panic!("expected Config command"),
        }
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "layerfix",
            "config",
            "validate",
            "--config",
            "/etc/layerfix.toml",
            "--output",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("parse succeeded");
        assert_eq!(cli.config, PathBuf::from("/etc/layerfix.toml"));
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_parse_verbosity_flags() {
        let cli = Cli::try_parse_from(["layerfix", "report", "r.json", "-vv"]).expect("parse succeeded");
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);

        let cli = Cli::try_parse_from(["layerfix", "-q", "report", "r.json"]).expect("parse succeeded");
        assert!(cli.quiet);

        assert!(Cli::try_parse_from(["layerfix", "-v", "-q", "report", "r.json"]).is_err());
    }

    #[test]
    fn test_cli_parse_default_config_path() {
        let cli = Cli::try_parse_from(["layerfix", "config", "validate"]).expect("parse succeeded");
        assert_eq!(cli.config, PathBuf::from("layerfix.toml"));
        assert!(matches!(cli.output, OutputFormat::Text));
    }

    #[test]
    fn test_cli_parse_invalid_command_fails() {
        assert!(Cli::try_parse_from(["layerfix", "invalid-command"]).is_err());
        assert!(Cli::try_parse_from(["layerfix"]).is_err());
    }

    #[test]
    fn test_cli_verify_command_structure() {
        let cmd = Cli::command();
        assert_eq!(cmd.get_name(), "layerfix");

        let subcommands: Vec<_> = cmd.get_subcommands().map(|s| s.get_name()).collect();
        for expected in ["patch", "platforms", "report", "config"] {
            assert!(subcommands.contains(&expected), "missing '{expected}' subcommand");
        }
    }
}
