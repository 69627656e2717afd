//! `layerfix platforms` command handler

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use layerfix_core::config::LayerfixConfig;
use layerfix_core::reference::ImageRef;
use layerfix_core::types::PatchPlatform;
use layerfix_patcher::{
    DaemonManifestSource, PatcherConfig, PlatformDiscovery, RegistryManifestSource,
    match_platforms, platforms_from_report_dir,
};
use layerfix_report::{ReportParser, parser_for};

use crate::cli::PlatformsArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, fit};

/// Execute the `platforms` command.
///
/// Lists the platforms of the image. With `--report-dir`, each platform is
/// paired with its report or marked as preserved.
pub async fn execute(
    args: PlatformsArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = LayerfixConfig::load_or_default(config_path).await?;
    let patcher_config = PatcherConfig::from_core(&config);
    let image = ImageRef::parse(&args.image).map_err(layerfix_core::error::LayerfixError::from)?;

    let discovery = PlatformDiscovery::new(
        DaemonManifestSource::connect(&patcher_config.docker_socket)?,
        RegistryManifestSource::from_config(&patcher_config)?,
    );

    info!(image = %image, "discovering platforms");
    let discovered = discovery.platforms_from_reference(&image).await?;

    let listing = match args.report_dir {
        Some(dir) => {
            let scanner = args.scanner.unwrap_or(patcher_config.scanner.clone());
            let parser: Arc<dyn ReportParser> =
                Arc::from(parser_for(&scanner, patcher_config.parse_options())?);
            let reports = tokio::task::spawn_blocking(move || {
                platforms_from_report_dir(&dir, parser.as_ref())
            })
            .await
            .map_err(|e| CliError::Command(format!("report scan task failed: {e}")))??;
            PlatformListing::new(image.to_string(), true, &match_platforms(&discovered, &reports))
        }
        None => PlatformListing::new(image.to_string(), false, &discovered),
    };

    writer.render(&listing)
}

/// Discovered platforms of one image.
#[derive(Serialize)]
pub struct PlatformListing {
    pub image: String,
    pub platforms: Vec<PlatformRow>,
    #[serde(skip)]
    matched: bool,
}

#[derive(Serialize)]
pub struct PlatformRow {
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    /// Only meaningful once reports were matched
    pub preserve: bool,
}

impl PlatformListing {
    pub fn new(image: String, matched: bool, platforms: &[PatchPlatform]) -> Self {
        Self {
            image,
            platforms: platforms
                .iter()
                .map(|p| PlatformRow {
                    platform: p.platform.key(),
                    report: p.report_file.as_ref().map(|f| f.display().to_string()),
                    preserve: matched && p.should_preserve,
                })
                .collect(),
            matched,
        }
    }
}

impl Render for PlatformListing {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Image: {} ({} platforms)",
            self.image.bold(),
            self.platforms.len()
        )?;
        writeln!(w)?;

        if !self.matched {
            for row in &self.platforms {
                writeln!(w, "  {}", row.platform)?;
            }
            return Ok(());
        }

        writeln!(w, "  {} {}", fit("PLATFORM", 24), "REPORT")?;
        for row in &self.platforms {
            let report = match &row.report {
                Some(path) => path.normal(),
                None => "(preserved)".yellow(),
            };
            writeln!(w, "  {} {}", fit(&row.platform, 24), report)?;
        }
        Ok(())
    }
}
