//! 생태계별 패키지 매니저 레지스트리
//!
//! 파이프라인이 시작될 때 한 번 만들어지고, 이후 플랫폼 태스크들이
//! `Arc`로 공유합니다. 전역 상태는 없습니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use layerfix_core::config::LayerfixConfig;
use layerfix_core::engine::BuildEngine;
use layerfix_core::types::Ecosystem;
use tracing::debug;

use crate::dpkg::DpkgManager;
use crate::error::PkgMgrError;
use crate::manager::DynPackageManager;
use crate::node::NodeManager;

/// 기본 매니저 구성에 필요한 설정
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// distroless 재구성 도구 이미지 (없으면 OS 버전에서 유도)
    pub debian_tooling_image: Option<String>,
    /// Node 애플리케이션 관례 루트 (순서대로 확인)
    pub node_app_roots: Vec<String>,
    /// Node 루트 재귀 탐색 깊이
    pub node_search_max_depth: u32,
}

impl ManagerSettings {
    /// 코어 설정에서 생성합니다.
    pub fn from_core(config: &LayerfixConfig) -> Self {
        let tooling = config.debian.tooling_image.trim();
        Self {
            debian_tooling_image: (!tooling.is_empty()).then(|| tooling.to_owned()),
            node_app_roots: config.node.app_roots.clone(),
            node_search_max_depth: config.node.search_max_depth,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_core(&LayerfixConfig::default())
    }
}

/// 생태계 → 매니저 매핑
#[derive(Clone, Default)]
pub struct ManagerRegistry {
    managers: BTreeMap<Ecosystem, Arc<dyn DynPackageManager>>,
}

impl ManagerRegistry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// Debian과 Node 매니저가 등록된 레지스트리
    pub fn with_defaults<E: BuildEngine>(engine: Arc<E>, settings: ManagerSettings) -> Self {
        let mut dpkg = DpkgManager::new(Arc::clone(&engine));
        if let Some(image) = settings.debian_tooling_image {
            dpkg = dpkg.with_tooling_image(image);
        }
        let node = NodeManager::new(engine)
            .with_app_roots(settings.node_app_roots)
            .with_search_max_depth(settings.node_search_max_depth);

        let mut registry = Self::new();
        registry.register(Arc::new(dpkg));
        registry.register(Arc::new(node));
        registry
    }

    /// 매니저를 등록합니다. 같은 생태계의 이전 매니저를 반환합니다.
    pub fn register(
        &mut self,
        manager: Arc<dyn DynPackageManager>,
    ) -> Option<Arc<dyn DynPackageManager>> {
        let ecosystem = manager.ecosystem();
        debug!(ecosystem = %ecosystem, "package manager registered");
        self.managers.insert(ecosystem, manager)
    }

    /// 생태계에 해당하는 매니저
    pub fn for_ecosystem(
        &self,
        ecosystem: Ecosystem,
    ) -> Result<Arc<dyn DynPackageManager>, PkgMgrError> {
        self.managers
            .get(&ecosystem)
            .cloned()
            .ok_or_else(|| PkgMgrError::EcosystemUnsupported(ecosystem.to_string()))
    }

    /// 리포트의 OS family에 해당하는 OS 수준 매니저
    pub fn for_os_family(&self, family: &str) -> Result<Arc<dyn DynPackageManager>, PkgMgrError> {
        let ecosystem = Ecosystem::from_os_family(family)
            .ok_or_else(|| PkgMgrError::EcosystemUnsupported(family.to_owned()))?;
        self.for_ecosystem(ecosystem)
    }

    /// 등록된 생태계 (정렬 순서)
    pub fn ecosystems(&self) -> Vec<Ecosystem> {
        self.managers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("ecosystems", &self.ecosystems())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerfix_core::testing::MockBuildEngine;

    fn registry() -> ManagerRegistry {
        ManagerRegistry::with_defaults(Arc::new(MockBuildEngine::new()), ManagerSettings::default())
    }

    #[test]
    fn defaults_cover_debian_and_node() {
        assert_eq!(registry().ecosystems(), [Ecosystem::Debian, Ecosystem::Node]);
    }

    #[test]
    fn os_family_lookup() {
        let r = registry();
        assert_eq!(r.for_os_family("ubuntu").unwrap().ecosystem(), Ecosystem::Debian);
        assert_eq!(r.for_os_family("Debian").unwrap().ecosystem(), Ecosystem::Debian);
        let err = r.for_os_family("alpine").err().unwrap();
        assert!(matches!(err, PkgMgrError::EcosystemUnsupported(ref f) if f == "alpine"));
    }

    #[test]
    fn empty_registry_reports_unsupported() {
        let err = ManagerRegistry::new()
            .for_ecosystem(Ecosystem::Node)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unsupported ecosystem: node");
    }

    #[test]
    fn register_replaces_previous() {
        let engine = Arc::new(MockBuildEngine::new());
        let mut r = ManagerRegistry::new();
        assert!(r.register(Arc::new(NodeManager::new(Arc::clone(&engine)))).is_none());
        assert!(r.register(Arc::new(NodeManager::new(engine))).is_some());
        assert_eq!(r.ecosystems(), [Ecosystem::Node]);
    }

    #[test]
    fn settings_from_core() {
        let mut config = LayerfixConfig::default();
        config.debian.tooling_image = "  ".to_owned();
        assert!(ManagerSettings::from_core(&config).debian_tooling_image.is_none());
        config.debian.tooling_image = "tools:1".to_owned();
        let s = ManagerSettings::from_core(&config);
        assert_eq!(s.debian_tooling_image.as_deref(), Some("tools:1"));
        assert_eq!(s.node_app_roots[0], "/app");
    }
}
