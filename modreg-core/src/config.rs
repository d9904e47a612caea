use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::blobclient::TokenCredential;
use crate::manifest::OCI_IMAGE_MANIFEST_MEDIA_TYPE;

const REGISTRY_ENABLED_ENV: &str = "BICEP_REGISTRY_ENABLED_EXPERIMENTAL";

// supplied by the external token-acquisition collaborator, per registry host
pub type AuthMap = HashMap<String, Arc<dyn TokenCredential>>;

// single config value, shared (Clone, cheap) into every component; only from_env touches the
// environment directly
#[derive(Clone)]
pub struct EngineConfig {
    pub cache_root: PathBuf,
    pub registry_enabled: bool,
    pub module_manifest_media_type: String,
    pub module_config_media_type: String,
    pub max_concurrent_downloads: usize,
    // gates every manifest/blob fetch; shared across clones so the bound holds engine-wide
    pub download_semaphore: Arc<Semaphore>,
    pub auth: AuthMap,
}

impl EngineConfig {
    pub fn new(cache_root: PathBuf) -> Self {
        let max_concurrent_downloads = 4;
        EngineConfig {
            cache_root,
            registry_enabled: true,
            module_manifest_media_type: OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
            module_config_media_type: "application/vnd.bicep.module.config.v1+json".to_string(),
            max_concurrent_downloads,
            download_semaphore: Arc::new(Semaphore::new(max_concurrent_downloads)),
            auth: AuthMap::new(),
        }
    }

    pub fn from_env(cache_root: PathBuf) -> Self {
        let registry_enabled = std::env::var(REGISTRY_ENABLED_ENV)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        EngineConfig { registry_enabled, ..EngineConfig::new(cache_root) }
    }
}
