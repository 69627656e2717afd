//! `layerfix report` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use layerfix_core::config::LayerfixConfig;
use layerfix_core::types::{UpdateManifest, UpdatePackage};
use layerfix_patcher::PatcherConfig;
use layerfix_report::parser_for;

use crate::cli::ReportArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, fit};

/// Execute the `report` command.
pub async fn execute(
    args: ReportArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = LayerfixConfig::load_or_default(config_path).await?;
    let patcher_config = PatcherConfig::from_core(&config);
    let scanner = args.scanner.unwrap_or(patcher_config.scanner.clone());

    info!(path = %args.path.display(), scanner = %scanner, "parsing report");

    let parser = parser_for(&scanner, patcher_config.parse_options())?;
    let path = args.path.clone();
    let manifest = tokio::task::spawn_blocking(move || parser.parse(&path))
        .await
        .map_err(|e| CliError::Command(format!("report parse task failed: {e}")))??;

    let view = ReportView::new(args.path.display().to_string(), scanner, manifest);
    writer.render(&view)
}

/// Parsed report as shown to the user.
#[derive(Serialize)]
pub struct ReportView {
    pub source: String,
    pub scanner: String,
    /// `os/arch[/variant]`, absent when the report carries no architecture
    pub platform: Option<String>,
    pub update_count: usize,
    pub manifest: UpdateManifest,
}

impl ReportView {
    pub fn new(source: String, scanner: String, manifest: UpdateManifest) -> Self {
        Self {
            source,
            scanner,
            platform: manifest.platform().map(|p| p.key()),
            update_count: manifest.update_count(),
            manifest,
        }
    }
}

impl Render for ReportView {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Report: {} ({})", self.source.bold(), self.scanner)?;
        writeln!(
            w,
            "  OS:       {} {}",
            self.manifest.os.family, self.manifest.os.version
        )?;
        writeln!(
            w,
            "  Platform: {}",
            self.platform.as_deref().unwrap_or("(unknown)")
        )?;
        writeln!(w, "  Updates:  {}", self.update_count)?;

        if !self.manifest.os_updates.is_empty() {
            writeln!(w)?;
            writeln!(w, "{}", "OS packages".bold())?;
            render_packages(w, &self.manifest.os_updates)?;
        }

        for (ecosystem, packages) in &self.manifest.lang_updates {
            if packages.is_empty() {
                continue;
            }
            writeln!(w)?;
            writeln!(w, "{}", format!("{ecosystem} packages").bold())?;
            render_packages(w, packages)?;
        }

        if !self.manifest.rejected.is_empty() {
            writeln!(w)?;
            writeln!(
                w,
                "{}",
                "Rejected (fixed version not installable)".yellow().bold()
            )?;
            render_packages(w, &self.manifest.rejected)?;
        }

        if self.update_count == 0 {
            writeln!(w)?;
            writeln!(w, "{}", "Nothing to update.".green())?;
        }

        Ok(())
    }
}

fn render_packages(w: &mut dyn Write, packages: &[UpdatePackage]) -> std::io::Result<()> {
    writeln!(
        w,
        "  {} {} {} {}",
        fit("PACKAGE", 28),
        fit("INSTALLED", 22),
        fit("FIXED", 22),
        "VULNERABILITY"
    )?;
    for p in packages {
        writeln!(
            w,
            "  {} {} {} {}",
            fit(&p.name, 28),
            fit(&p.installed_version, 22),
            fit(&p.fixed_version, 22),
            p.vulnerability_id
        )?;
    }
    Ok(())
}
