//! 멀티 플랫폼 결과 조립
//!
//! 플랫폼마다 패치된 이미지(없으면 원본)를 골라 한 번의 export 요청으로
//! OCI 이미지 레이아웃 아카이브를 받고, 출력 디렉토리에 풉니다.
//!
//! 출력 디렉토리는 쓰기 전에 통째로 비우므로 같은 입력으로 다시 실행하면
//! 같은 결과가 남습니다.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use layerfix_core::engine::BuildEngine;
use layerfix_core::metrics as m;
use layerfix_core::state::FsState;
use layerfix_core::types::{PatchPlatform, PatchResult, Platform};
use tracing::{debug, info, warn};

use crate::error::PatchError;

/// OCI 레이아웃 조립기
pub struct LayoutAssembler<E> {
    engine: Arc<E>,
    work_dir: PathBuf,
}

impl<E: BuildEngine> LayoutAssembler<E> {
    /// 새 조립기를 생성합니다. 스테이징 아카이브는 `work_dir`에 만들어집니다.
    pub fn new(engine: Arc<E>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            work_dir: work_dir.into(),
        }
    }

    /// 플랫폼별 이미지를 하나의 레이아웃으로 조립합니다.
    ///
    /// 반환값은 `플랫폼 키 -> 사용한 이미지 참조`입니다.
    pub async fn assemble(
        &self,
        results: &[PatchResult],
        platforms: &[PatchPlatform],
        output_dir: &Path,
    ) -> Result<BTreeMap<String, String>, PatchError> {
        let selected = select_images(results, platforms);
        if selected.is_empty() {
            return Err(PatchError::NoPlatformImages);
        }

        let targets: Vec<(Platform, FsState)> = selected
            .iter()
            .map(|(platform, image)| (platform.clone(), FsState::image(image.clone(), platform.clone())))
            .collect();
        let mapping: BTreeMap<String, String> = selected
            .into_iter()
            .map(|(platform, image)| (platform.key(), image))
            .collect();

        remove_dir_if_exists(output_dir).await?;
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| PatchError::Io {
                path: self.work_dir.display().to_string(),
                source,
            })?;

        let archive = self
            .work_dir
            .join(format!("layout-{}.tar", uuid::Uuid::new_v4().simple()));
        let result = self.export_and_unpack(&targets, &archive, output_dir).await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(archive = %archive.display(), error = %e, "failed to remove staging archive");
            }
        }
        result?;

        metrics::counter!(m::ASSEMBLY_LAYOUTS_TOTAL).increment(1);
        info!(
            output = %output_dir.display(),
            platforms = mapping.len(),
            "oci layout written"
        );
        Ok(mapping)
    }

    async fn export_and_unpack(
        &self,
        targets: &[(Platform, FsState)],
        archive: &Path,
        output_dir: &Path,
    ) -> Result<(), PatchError> {
        self.engine
            .export_layout(targets, archive)
            .await
            .map_err(|e| PatchError::Assembly(e.to_string()))?;

        let archive = archive.to_path_buf();
        let output = output_dir.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_layout(&archive, &output))
            .await
            .map_err(|e| PatchError::Assembly(format!("unpack task failed: {e}")))?
    }
}

/// 플랫폼 순서대로 `(플랫폼, 사용할 이미지)`를 고릅니다.
///
/// 결과가 없는 플랫폼은 건너뜁니다.
pub fn select_images(results: &[PatchResult], platforms: &[PatchPlatform]) -> Vec<(Platform, String)> {
    let by_key: BTreeMap<String, &PatchResult> =
        results.iter().map(|r| (r.platform.key(), r)).collect();

    platforms
        .iter()
        .filter_map(|p| {
            let key = p.platform.key();
            match by_key.get(&key) {
                Some(result) => Some((p.platform.clone(), result.effective_ref().to_owned())),
                None => {
                    warn!(platform = %key, "no result for platform, leaving it out of the layout");
                    None
                }
            }
        })
        .collect()
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), PatchError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!(dir = %dir.display(), "removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PatchError::Io {
            path: dir.display().to_string(),
            source,
        }),
    }
}

/// 레이아웃 아카이브를 `output_dir`에 풉니다.
///
/// 디렉토리를 먼저 모두 만들고 파일을 쓴 뒤, 마지막에 디렉토리 모드를
/// 깊은 것부터 적용합니다. 파일 모드는 쓰는 즉시 적용합니다. 출력 디렉토리
/// 밖을 가리키는 항목은 거부하며, 실패하면 쓰다 만 `output_dir`을 지웁니다.
/// 동기 I/O이므로 `spawn_blocking` 안에서 호출합니다.
pub fn unpack_layout(archive: &Path, output_dir: &Path) -> Result<(), PatchError> {
    let result = unpack_into(archive, output_dir);
    if result.is_err() {
        match std::fs::remove_dir_all(output_dir) {
            Ok(()) => debug!(output = %output_dir.display(), "removed partial layout"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(output = %output_dir.display(), error = %e, "failed to remove partial layout")
            }
        }
    }
    result
}

fn unpack_into(archive: &Path, output_dir: &Path) -> Result<(), PatchError> {
    let open = || {
        std::fs::File::open(archive).map_err(|source| PatchError::Io {
            path: archive.display().to_string(),
            source,
        })
    };
    let bad = |reason: String| PatchError::Assembly(format!("{}: {reason}", archive.display()));
    let io = |path: &Path, source| PatchError::Io {
        path: path.display().to_string(),
        source,
    };

    std::fs::create_dir_all(output_dir).map_err(|e| io(output_dir, e))?;

    // 1단계: 디렉토리 (모드는 3단계에서)
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    let mut tar = tar::Archive::new(open()?);
    for entry in tar.entries().map_err(|e| bad(e.to_string()))? {
        let entry = entry.map_err(|e| bad(e.to_string()))?;
        if entry.header().entry_type() != tar::EntryType::Directory {
            continue;
        }
        let rel = entry_path(&entry).map_err(&bad)?;
        let dest = output_dir.join(&rel);
        std::fs::create_dir_all(&dest).map_err(|e| io(&dest, e))?;
        dir_modes.push((dest, entry.header().mode().unwrap_or(0o755)));
    }

    // 2단계: 파일
    let mut tar = tar::Archive::new(open()?);
    let mut files = 0usize;
    for entry in tar.entries().map_err(|e| bad(e.to_string()))? {
        let mut entry = entry.map_err(|e| bad(e.to_string()))?;
        let kind = entry.header().entry_type();
        if kind == tar::EntryType::Directory {
            continue;
        }
        let rel = entry_path(&entry).map_err(&bad)?;
        if !matches!(kind, tar::EntryType::Regular | tar::EntryType::Continuous) {
            warn!(entry = %rel.display(), kind = ?kind, "skipping non-regular layout entry");
            continue;
        }

        let dest = output_dir.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io(parent, e))?;
        }
        let mode = entry.header().mode().unwrap_or(0o644);
        let mut file = std::fs::File::create(&dest).map_err(|e| io(&dest, e))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| io(&dest, e))?;
        drop(file);
        set_mode(&dest, mode).map_err(|e| io(&dest, e))?;
        files += 1;
    }

    // 3단계: 디렉토리 모드, 자식이 부모보다 먼저
    dir_modes.sort_by_key(|(dir, _)| std::cmp::Reverse(dir.components().count()));
    for (dir, mode) in &dir_modes {
        set_mode(dir, *mode).map_err(|e| io(dir, e))?;
    }

    debug!(output = %output_dir.display(), files, dirs = dir_modes.len(), "layout unpacked");
    Ok(())
}

fn entry_path<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> Result<PathBuf, String> {
    let path = entry.path().map_err(|e| format!("invalid entry path: {e}"))?;
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(format!("entry escapes output directory: {}", path.display())),
        }
    }
    Ok(clean)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
