//! `layerfix patch` command handler

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use layerfix_core::config::LayerfixConfig;
use layerfix_core::error::LayerfixError;
use layerfix_core::reference::ImageRef;
use layerfix_core::types::{PatchStatus, Platform};
use layerfix_patcher::{
    DaemonManifestSource, DockerBuildEngine, LayoutAssembler, PatchError, PatchSummary, Patcher,
    PatcherConfig, PatcherConfigBuilder, PlatformDiscovery, RegistryManifestSource, VexDocument,
};
use layerfix_pkgmgr::ManagerSettings;

use crate::cli::PatchArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render, fit};

/// Default OCI layout directory for the multi-platform flow.
const DEFAULT_OUTPUT_DIR: &str = "layerfix-oci";

/// Author recorded in VEX documents.
const VEX_AUTHOR: &str = "layerfix";

/// Execute the `patch` command.
///
/// A report directory runs discovery, patches every matched platform and
/// assembles an OCI layout. A report file patches one platform.
pub async fn execute(
    args: PatchArgs,
    config_path: &Path,
    writer: &OutputWriter,
    cancel: CancellationToken,
) -> Result<(), CliError> {
    let config = LayerfixConfig::load_or_default(config_path).await?;
    let patcher_config = patcher_config(&config, &args)?;
    let image = ImageRef::parse(&args.image).map_err(LayerfixError::from)?;

    let engine = Arc::new(DockerBuildEngine::connect(&patcher_config).map_err(PatchError::from)?);
    let patcher = Patcher::from_config(
        Arc::clone(&engine),
        patcher_config.clone(),
        ManagerSettings::from_core(&config),
    )?;

    let is_dir = tokio::fs::metadata(&args.report)
        .await
        .map_err(|source| PatchError::Io {
            path: args.report.display().to_string(),
            source,
        })?
        .is_dir();

    let report = if is_dir {
        let output_dir = args
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        patch_multi(&patcher, &patcher_config, &image, &args.report, &output_dir, cancel).await?
    } else {
        if args.output_dir.is_some() {
            warn!("--output-dir only applies to a report directory, ignoring");
        }
        let platform = single_platform(&patcher, &args).await?;
        info!(image = %image, platform = %platform, "patching single platform");
        let result = patcher.patch_single(&image, &args.report, platform).await?;
        PatchReport::new(image.to_string(), None, PatchSummary::from_results(vec![result]))
    };

    if let Some(vex_path) = &args.vex {
        let doc = VexDocument::from_summary(&report.summary, VEX_AUTHOR);
        if doc.is_empty() {
            warn!(path = %vex_path.display(), "no updated packages, writing an empty VEX document");
        }
        doc.write_to(vex_path).await?;
        info!(path = %vex_path.display(), statements = doc.statements.len(), "VEX document written");
    }

    writer.render(&report)?;

    if report.summary.is_partial() {
        return Err(CliError::Partial(format!(
            "{} platform(s) failed, {} package(s) not updated",
            report.summary.failed_count(),
            report.summary.failed_package_count()
        )));
    }
    Ok(())
}

/// Core config with command-line flags applied on top.
fn patcher_config(config: &LayerfixConfig, args: &PatchArgs) -> Result<PatcherConfig, CliError> {
    let mut builder = PatcherConfigBuilder::from_core(config);
    if args.ignore_errors {
        builder = builder.ignore_errors(true);
    }
    if args.continue_on_error {
        builder = builder.continue_on_platform_error(true);
    }
    if let Some(tag) = &args.tag {
        builder = builder.tag(tag.clone());
    }
    if let Some(scanner) = &args.scanner {
        builder = builder.scanner(scanner.clone());
    }
    Ok(builder.build()?)
}

async fn patch_multi(
    patcher: &Patcher<DockerBuildEngine>,
    config: &PatcherConfig,
    image: &ImageRef,
    report_dir: &Path,
    output_dir: &Path,
    cancel: CancellationToken,
) -> Result<PatchReport, CliError> {
    let discovery = PlatformDiscovery::new(
        DaemonManifestSource::connect(&config.docker_socket)?,
        RegistryManifestSource::from_config(config)?,
    );
    let platforms = discovery
        .discover_platforms(image, report_dir, patcher.parser())
        .await?;

    let summary = patcher.patch_all(image, platforms.clone(), cancel).await?;

    let assembler = LayoutAssembler::new(Arc::clone(patcher.engine()), config.work_dir.clone());
    assembler
        .assemble(&summary.results, &platforms, output_dir)
        .await?;

    Ok(PatchReport::new(
        image.to_string(),
        Some(output_dir.display().to_string()),
        summary,
    ))
}

/// Platform for a single report: the flag, then the report's own
/// architecture, then the host.
async fn single_platform(
    patcher: &Patcher<DockerBuildEngine>,
    args: &PatchArgs,
) -> Result<Platform, CliError> {
    if let Some(spec) = &args.platform {
        return Platform::parse(spec)
            .ok_or_else(|| CliError::Command(format!("invalid platform: {spec}")));
    }

    let parser = patcher.parser();
    let path = args.report.clone();
    let manifest = tokio::task::spawn_blocking(move || parser.parse(&path))
        .await
        .map_err(|e| CliError::Command(format!("report parse task failed: {e}")))?;

    match manifest {
        Ok(m) => Ok(m.platform().unwrap_or_else(host_platform)),
        // the pipeline reports the parse failure with the platform attached
        Err(_) => Ok(host_platform()),
    }
}

/// The host as a container platform.
pub fn host_platform() -> Platform {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        "loongarch64" => "loong64",
        other => other,
    };
    Platform::new("linux", arch)
}

/// Result of one `patch` run.
#[derive(Serialize)]
pub struct PatchReport {
    pub image: String,
    /// OCI layout directory (multi-platform flow only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    pub patched: usize,
    pub unchanged: usize,
    pub preserved: usize,
    pub failed: usize,
    pub updated_packages: usize,
    pub failed_packages: usize,
    pub summary: PatchSummary,
}

impl PatchReport {
    pub fn new(image: String, layout: Option<String>, summary: PatchSummary) -> Self {
        Self {
            image,
            layout,
            patched: summary.patched_count(),
            unchanged: summary.unchanged_count(),
            preserved: summary.preserved_count(),
            failed: summary.failed_count(),
            updated_packages: summary.updated_package_count(),
            failed_packages: summary.failed_package_count(),
            summary,
        }
    }
}

impl Render for PatchReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Patch: {}", self.image.bold())?;
        writeln!(w)?;
        writeln!(w, "  {} {} {}", fit("PLATFORM", 20), fit("STATUS", 10), "IMAGE")?;

        for result in &self.summary.results {
            let status = match &result.status {
                PatchStatus::Patched => fit("patched", 10).green(),
                PatchStatus::Unchanged => fit("unchanged", 10).normal(),
                PatchStatus::Preserved => fit("preserved", 10).cyan(),
                PatchStatus::Failed { .. } => fit("failed", 10).red(),
            };
            writeln!(
                w,
                "  {} {} {}",
                fit(&result.platform.key(), 20),
                status,
                result.patched_ref
            )?;
            if let PatchStatus::Failed { reason } = &result.status {
                writeln!(w, "      {}", reason.red())?;
            }
            if !result.failed_packages.is_empty() {
                writeln!(
                    w,
                    "      {} {}",
                    "not updated:".yellow(),
                    result.failed_packages.join(", ")
                )?;
            }
        }

        writeln!(w)?;
        writeln!(
            w,
            "Platforms: {} patched, {} unchanged, {} preserved, {} failed",
            self.patched, self.unchanged, self.preserved, self.failed
        )?;
        writeln!(
            w,
            "Packages:  {} updated, {} failed",
            self.updated_packages, self.failed_packages
        )?;
        if let Some(layout) = &self.layout {
            writeln!(w, "Layout:    {}", layout.bold())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use layerfix_core::types::PatchResult;

    use crate::cli::{Cli, Commands};

    fn patch_args(extra: &[&str]) -> PatchArgs {
        let mut argv = vec!["layerfix", "patch", "--image", "debian:12", "--report", "r.json"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse succeeded").command {
            Commands::Patch(args) => args,
            _ => panic!("expected Patch command"),
        }
    }

    fn summary() -> PatchSummary {
        let mut patched = PatchResult::passthrough(
            "docker.io/library/debian:12",
            Platform::new("linux", "amd64"),
            PatchStatus::Patched,
        );
        patched.patched_ref = "docker.io/library/debian:12-patched-amd64".to_owned();
        patched.failed_packages.push("libc6".to_owned());
        let failed = PatchResult::passthrough(
            "docker.io/library/debian:12",
            Platform::new("linux", "arm").with_variant("v7"),
            PatchStatus::Failed {
                reason: "commit failed".to_owned(),
            },
        );
        PatchSummary::from_results(vec![patched, failed])
    }

    #[test]
    fn test_flags_override_config() {
        let mut core = LayerfixConfig::default();
        core.patch.scanner = "trivy".to_owned();
        let config = patcher_config(
            &core,
            &patch_args(&["--ignore-errors", "--continue-on-error", "--tag", "v2", "--scanner", "native"]),
        )
        .expect("config builds");
        assert!(config.ignore_errors);
        assert!(config.continue_on_platform_error);
        assert_eq!(config.tag.as_deref(), Some("v2"));
        assert_eq!(config.scanner, "native");
    }

    #[test]
    fn test_absent_flags_keep_config_values() {
        let mut core = LayerfixConfig::default();
        core.patch.ignore_errors = true;
        let config = patcher_config(&core, &patch_args(&[])).expect("config builds");
        assert!(config.ignore_errors);
        assert!(config.tag.is_none());
        assert_eq!(config.scanner, "trivy");
    }

    #[test]
    fn test_host_platform_is_linux() {
        let host = host_platform();
        assert_eq!(host.os, "linux");
        assert!(!host.architecture.is_empty());
        assert_ne!(host.architecture, "x86_64");
    }

    #[test]
    fn test_patch_report_counts() {
        let report = PatchReport::new("debian:12".to_owned(), Some("out".to_owned()), summary());
        assert_eq!(report.patched, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_packages, 1);
        assert!(report.summary.is_partial());
    }

    #[test]
    fn test_patch_report_text_names_failures() {
        let report = PatchReport::new("debian:12".to_owned(), Some("out".to_owned()), summary());
        let mut buffer = Vec::new();
        report
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        let output = String::from_utf8(buffer).expect("valid UTF-8");

        assert!(output.contains("debian:12-patched-amd64"));
        assert!(output.contains("linux/arm/v7"));
        assert!(output.contains("commit failed"));
        assert!(output.contains("libc6"));
        assert!(output.contains("1 patched, 0 unchanged, 0 preserved, 1 failed"));
        assert!(output.contains("out"));
    }

    #[test]
    fn test_patch_report_json_omits_missing_layout() {
        let report = PatchReport::new("debian:12".to_owned(), None, summary());
        let json = serde_json::to_value(&report).expect("JSON serialization should succeed");
        assert!(json.get("layout").is_none());
        assert_eq!(json["summary"]["failed_platforms"][0], "linux/arm/v7");
        assert_eq!(json["summary"]["results"][1]["status"]["state"], "failed");
    }
}
