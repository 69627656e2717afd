//! Logging initialization for the layerfix binary.
//!
//! Diagnostics always go to stderr; stdout carries only command output.
//! The effective level comes from, in order: `--log-level`, `-v`/`-q`,
//! `RUST_LOG`, then `[general].log_level`. With `--output json` and no
//! explicit level, logging drops to `warn` so a piped JSON consumer only
//! sees problems on stderr.

use std::io::IsTerminal;

use anyhow::{Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use layerfix_core::config::GeneralConfig;

use crate::cli::{Cli, OutputFormat};

/// Crates whose own logging is capped at `warn` below a verbose level.
const NOISY_DEPENDENCIES: [&str; 4] = ["bollard", "hyper", "h2", "reqwest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Resolved logging setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    /// `RUST_LOG` may replace `level` (only when no flag set it).
    pub honor_env: bool,
    pub ansi: bool,
}

impl LogSettings {
    /// Combines the config file's `[general]` section with the global flags.
    pub fn resolve(general: &GeneralConfig, cli: &Cli) -> Result<Self> {
        let format = match general.log_format.as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
        };

        let flag_level = match (&cli.log_level, cli.verbose, cli.quiet) {
            (Some(level), _, _) => Some(level.clone()),
            (None, 1, _) => Some("debug".to_owned()),
            (None, v, _) if v >= 2 => Some("trace".to_owned()),
            (None, _, true) => Some("error".to_owned()),
            _ => None,
        };
        let machine_output = matches!(cli.output, OutputFormat::Json);

        let (level, honor_env) = match flag_level {
            Some(level) => (level, false),
            None if machine_output => (quieter(&general.log_level, "warn").to_owned(), true),
            None => (general.log_level.clone(), true),
        };

        Ok(Self {
            level,
            format,
            honor_env,
            ansi: format == LogFormat::Pretty && std::io::stderr().is_terminal(),
        })
    }

    /// Filter directives for [`EnvFilter`].
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        if matches!(self.level.as_str(), "info" | "debug" | "trace") {
            for dep in NOISY_DEPENDENCIES {
                directives.push_str(&format!(",{dep}=warn"));
            }
        }
        directives
    }
}

/// The less verbose of two level names.
fn quieter<'a>(a: &'a str, b: &'a str) -> &'a str {
    const ORDER: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    let rank = |l: &str| ORDER.iter().position(|o| *o == l).unwrap_or(2);
    if rank(a) >= rank(b) { a } else { b }
}

/// Installs the global subscriber. Call once, before any tracing macro.
pub fn init_tracing(settings: &LogSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) if settings.honor_env => from_env,
        _ => EnvFilter::try_new(settings.directives())
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {e}", settings.level))?,
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(settings.ansi);
    let layer = match settings.format {
        LogFormat::Json => fmt.json().boxed(),
        LogFormat::Pretty => fmt.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
