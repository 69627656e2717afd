//! Debian 계열 (dpkg/apt) 패키지 매니저
//!
//! 대상 이미지에 `/var/lib/dpkg/status`가 있으면 이미지 안에서
//! `apt-get --only-upgrade`로 바로 업그레이드합니다.
//!
//! status 파일 없이 `status.d` 조각만 가진 최소 이미지(distroless)는
//! 셸도 apt도 없으므로 도구 이미지에서 격리 설치합니다.
//!
//! ```text
//! target ──copy /var/lib/dpkg──▶ tooling:/tmp/<sid>/admin
//!                                   │ status 합성 → apt-get download → dpkg --root
//!                                   ▼
//!                          admin/status, results.manifest  ──read──▶ split_status
//!                                                                        │
//! target ◀──copy /tmp/<sid>/root/──┘          host scratch/status.d ◀────┘
//! target ◀──copy status.d fragments (touched packages only)
//! ```

pub mod status;
pub mod version;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use layerfix_core::engine::BuildEngine;
use layerfix_core::state::{FsState, RunSpec};
use layerfix_core::types::{Ecosystem, UpdateManifest, UpdatePackage};
use tracing::{debug, info, warn};

use crate::error::PkgMgrError;
use crate::manager::{InstallContext, InstallOutcome, PackageManager, shell_quote, updates_for};
use crate::unique::unique_latest;

/// 통합 status 파일 경로
pub const STATUS_PATH: &str = "/var/lib/dpkg/status";
/// 패키지별 status 조각 디렉토리
pub const STATUS_DIR: &str = "/var/lib/dpkg/status.d";

/// 이미지 안에서 apt로 업그레이드하는 스크립트
const APT_UPGRADE_SCRIPT: &str = r#"set -eu
export DEBIAN_FRONTEND=noninteractive
apt-get update
if [ "$LAYERFIX_IGNORE_ERRORS" = 1 ]; then
  for p in $LAYERFIX_PACKAGES; do
    apt-get install --no-install-recommends -y --only-upgrade "$p" || echo "layerfix: failed to upgrade $p" >&2
  done
else
  apt-get install --no-install-recommends -y --only-upgrade $LAYERFIX_PACKAGES
fi
apt-get clean
rm -rf /var/lib/apt/lists/*
"#;

/// 도구 이미지에서 격리 설치 후 결과 매니페스트를 남기는 스크립트
const RECONCILE_SCRIPT: &str = r#"set -eu
export DEBIAN_FRONTEND=noninteractive
cd "$LAYERFIX_WORK"
mkdir -p root cache admin/updates admin/info admin/triggers
chmod 0777 cache
touch admin/available
if [ ! -f admin/status ]; then
  : > admin/status
  if [ -d admin/status.d ]; then
    for f in admin/status.d/*; do
      case "$f" in *.md5sums) continue ;; esac
      [ -f "$f" ] || continue
      cat "$f" >> admin/status
      printf '\n' >> admin/status
    done
  fi
fi
apt-get update
cd cache
if [ "$LAYERFIX_IGNORE_ERRORS" = 1 ]; then
  for p in $LAYERFIX_PACKAGES; do
    apt-get download "$p" || echo "layerfix: failed to download $p" >&2
  done
else
  apt-get download $LAYERFIX_PACKAGES
fi
cd "$LAYERFIX_WORK"
: > results.manifest
for deb in cache/*.deb; do
  [ -f "$deb" ] || continue
  dpkg-deb --show --showformat='${Package}\t${Version}\n' "$deb" >> results.manifest
done
if ls cache/*.deb > /dev/null 2>&1; then
  if [ "$LAYERFIX_IGNORE_ERRORS" = 1 ]; then
    dpkg --root="$LAYERFIX_WORK/root" --admindir="$LAYERFIX_WORK/admin" --force-all --install cache/*.deb || true
  else
    dpkg --root="$LAYERFIX_WORK/root" --admindir="$LAYERFIX_WORK/admin" --force-all --install cache/*.deb
  fi
fi
"#;

/// Debian 패키지 매니저
pub struct DpkgManager<E> {
    engine: Arc<E>,
    tooling_image: Option<String>,
}

impl<E: BuildEngine> DpkgManager<E> {
    /// 엔진을 공유하는 매니저를 생성합니다.
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            tooling_image: None,
        }
    }

    /// distroless 재구성에 쓸 도구 이미지를 고정합니다.
    pub fn with_tooling_image(mut self, image: impl Into<String>) -> Self {
        let image = image.into();
        self.tooling_image = (!image.is_empty()).then_some(image);
        self
    }

    /// 도구 이미지: 설정값, 없으면 OS family와 버전에서 유도
    pub fn tooling_image_for(&self, family: &str, version: &str) -> Option<String> {
        if let Some(image) = &self.tooling_image {
            return Some(image.clone());
        }
        let version = version.trim();
        if version.is_empty() {
            return None;
        }
        match family.to_ascii_lowercase().as_str() {
            "debian" => {
                let major = version.split('.').next().unwrap_or(version);
                Some(format!("debian:{major}-slim"))
            }
            "ubuntu" => Some(format!("ubuntu:{version}")),
            _ => None,
        }
    }

    async fn upgrade_in_place(
        &self,
        state: &FsState,
        updates: &[UpdatePackage],
        ctx: &InstallContext,
    ) -> Result<InstallOutcome, PkgMgrError> {
        let names = package_list(updates);
        let step = RunSpec::new("apt-upgrade", APT_UPGRADE_SCRIPT)
            .env("LAYERFIX_PACKAGES", names)
            .env("LAYERFIX_IGNORE_ERRORS", flag(ctx.ignore_errors));
        let upgraded = state.run(step);

        let status = self
            .engine
            .read_file(&upgraded, &ctx.platform, STATUS_PATH)
            .await?
            .ok_or_else(|| PkgMgrError::Reconciliation {
                platform: ctx.platform.key(),
                reason: format!("{STATUS_PATH} disappeared after upgrade"),
            })?;
        let installed = status::installed_versions(&String::from_utf8_lossy(&status));

        let (updated, failed) = verify(updates, &installed);
        Ok(InstallOutcome {
            state: upgraded,
            failed,
            updated,
        })
    }

    async fn reconcile_fragments(
        &self,
        state: &FsState,
        manifest: &UpdateManifest,
        updates: &[UpdatePackage],
        ctx: &InstallContext,
    ) -> Result<InstallOutcome, PkgMgrError> {
        let platform = ctx.platform.key();
        let tooling_ref = self
            .tooling_image_for(&manifest.os.family, &manifest.os.version)
            .ok_or_else(|| PkgMgrError::Reconciliation {
                platform: platform.clone(),
                reason: format!(
                    "cannot derive a tooling image for '{} {}'",
                    manifest.os.family, manifest.os.version
                ),
            })?;
        debug!(platform = %platform, tooling = %tooling_ref, "reconciling dpkg fragments");

        let work = format!("/tmp/{}", ctx.scratch_id);
        let tooling = FsState::image(&tooling_ref, ctx.platform.clone())
            .copy_from(state, "/var/lib/dpkg", format!("{work}/admin"))
            .run(
                RunSpec::new("dpkg-reconcile", RECONCILE_SCRIPT)
                    .env("LAYERFIX_WORK", work.as_str())
                    .env("LAYERFIX_PACKAGES", package_list(updates))
                    .env("LAYERFIX_IGNORE_ERRORS", flag(ctx.ignore_errors)),
            );

        let status_path = format!("{work}/admin/status");
        let results_path = format!("{work}/results.manifest");
        let status = self
            .engine
            .read_file(&tooling, &ctx.platform, &status_path)
            .await?
            .ok_or_else(|| PkgMgrError::Reconciliation {
                platform: platform.clone(),
                reason: format!("{status_path} missing after install"),
            })?;
        let downloaded = self
            .engine
            .read_file(&tooling, &ctx.platform, &results_path)
            .await?
            .map(|b| status::parse_results_manifest(&String::from_utf8_lossy(&b)))
            .unwrap_or_default();

        // a download only counts once the admin status shows it installed
        let admin_status = String::from_utf8_lossy(&status);
        let installed = status::installed_versions(&admin_status);
        let landed: HashMap<String, String> = downloaded
            .into_iter()
            .filter(|(name, version)| {
                let ok = installed.get(name) == Some(version);
                if !ok {
                    warn!(
                        platform = %platform,
                        package = %name,
                        downloaded = %version,
                        installed = installed.get(name).map(String::as_str).unwrap_or("none"),
                        "downloaded package was not installed"
                    );
                }
                ok
            })
            .collect();

        let (updated, failed) = verify(updates, &landed);

        let fragments: Vec<_> = status::split_status(&admin_status)
            .into_iter()
            .filter(|f| landed.contains_key(&f.package))
            .collect();

        if fragments.is_empty() {
            warn!(platform = %platform, "no packages were installed, target left unchanged");
            return Ok(InstallOutcome {
                state: state.clone(),
                failed,
                updated: Vec::new(),
            });
        }

        let status_dir = ctx.scratch_dir.join("status.d");
        write_fragments(&status_dir, &fragments).await?;
        info!(
            platform = %platform,
            fragments = fragments.len(),
            "wrote dpkg status fragments"
        );

        let patched = state
            .copy_from(&tooling, format!("{work}/root/"), "/")
            .copy_from(&FsState::local(status_dir), "/", format!("{STATUS_DIR}/"));

        Ok(InstallOutcome {
            state: patched,
            failed,
            updated,
        })
    }
}

impl<E: BuildEngine> PackageManager for DpkgManager<E> {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Debian
    }

    async fn install_updates(
        &self,
        state: &FsState,
        manifest: Option<&UpdateManifest>,
        ctx: &InstallContext,
    ) -> Result<InstallOutcome, PkgMgrError> {
        let requested = updates_for(manifest, Ecosystem::Debian);
        let Some(manifest) = manifest.filter(|_| !requested.is_empty()) else {
            return Ok(InstallOutcome::unchanged(state));
        };

        let mut invalid = Vec::new();
        let valid: Vec<UpdatePackage> = requested
            .iter()
            .filter(|p| {
                let ok = is_valid_package_name(&p.name);
                if !ok {
                    invalid.push(p.name.clone());
                }
                ok
            })
            .cloned()
            .collect();
        let updates = unique_latest(&valid, version::compare);

        let mut outcome = if updates.is_empty() {
            InstallOutcome::unchanged(state)
        } else if self
            .engine
            .read_file(state, &ctx.platform, STATUS_PATH)
            .await?
            .is_some()
        {
            debug!(platform = %ctx.platform, packages = updates.len(), "status file present, upgrading with apt");
            self.upgrade_in_place(state, &updates, ctx).await?
        } else {
            debug!(platform = %ctx.platform, packages = updates.len(), "no status file, reconciling fragments");
            self.reconcile_fragments(state, manifest, &updates, ctx)
                .await?
        };

        outcome.failed.extend(invalid);
        if !outcome.failed.is_empty() {
            warn!(
                platform = %ctx.platform,
                failed = %outcome.failed.join(", "),
                "some debian packages were not updated"
            );
        }
        outcome.into_result(ctx)
    }
}

/// 요청과 설치 결과를 비교해 (성공, 실패 이름) 으로 나눕니다.
fn verify(
    updates: &[UpdatePackage],
    installed: &HashMap<String, String>,
) -> (Vec<UpdatePackage>, Vec<String>) {
    let mut updated = Vec::new();
    let mut failed = Vec::new();
    for update in updates {
        match installed.get(&update.name) {
            Some(v) if version::compare(v, &update.fixed_version) != Ordering::Less => {
                updated.push(UpdatePackage {
                    fixed_version: v.clone(),
                    ..update.clone()
                });
            }
            Some(v) => {
                warn!(package = %update.name, installed = %v, fixed = %update.fixed_version, "installed version below fixed version");
                failed.push(update.name.clone());
            }
            None => failed.push(update.name.clone()),
        }
    }
    (updated, failed)
}

/// `status.d` 조각을 호스트 scratch 디렉토리에 씁니다. 이전 내용은 지웁니다.
async fn write_fragments(dir: &Path, fragments: &[status::Fragment]) -> Result<(), PkgMgrError> {
    let io_err = |source| PkgMgrError::Io {
        path: dir.display().to_string(),
        source,
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    for fragment in fragments {
        tokio::fs::write(dir.join(&fragment.file_name), &fragment.contents)
            .await
            .map_err(io_err)?;
    }
    Ok(())
}

/// Debian 패키지 이름 규칙: 소문자, 숫자, `+ - .`, 두 글자 이상, 영숫자로 시작
/// (`:arch` 한정자 허용)
fn is_valid_package_name(name: &str) -> bool {
    let base = name.split_once(':').map_or(name, |(n, _)| n);
    base.len() >= 2
        && base.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && base
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

fn package_list(updates: &[UpdatePackage]) -> String {
    updates
        .iter()
        .map(|p| shell_quote(&p.name))
        .collect::<Vec<_>>()
        .join(" ")
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}
