use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::ArtifactManager;
use crate::blobclient::{BlobClient, HttpBlobClient, NoCredential};
use crate::cache::CacheEntry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::reference::{ModuleReference, OciReference};

// capability set rather than a trait object hierarchy: Local has no network dependency at all,
// so there's nothing to gain from forcing both variants through one interface
pub enum Registry<'a> {
    Local(LocalRegistry),
    Oci(OciRegistry<'a>),
}

impl<'a> Registry<'a> {
    // no-op for local references; they resolve directly off disk
    pub async fn restore(&self, reference: &ModuleReference) -> Result<(), EngineError> {
        match self {
            Registry::Local(r) => r.restore(reference),
            Registry::Oci(r) => r.restore(reference).await,
        }
    }

    pub async fn in_cache(&self, reference: &ModuleReference) -> bool {
        match self {
            Registry::Local(r) => r.in_cache(reference),
            Registry::Oci(r) => r.in_cache(reference).await,
        }
    }

    pub fn local_path(&self, reference: &ModuleReference) -> Option<PathBuf> {
        match self {
            Registry::Local(r) => r.local_path(reference),
            Registry::Oci(r) => r.local_path(reference),
        }
    }
}

pub fn dispatch<'a>(reference: &ModuleReference, config: &'a EngineConfig) -> Registry<'a> {
    match reference {
        ModuleReference::Local { .. } => Registry::Local(LocalRegistry),
        ModuleReference::Oci(_) => Registry::Oci(OciRegistry::new(config)),
    }
}

pub struct LocalRegistry;

impl LocalRegistry {
    fn restore(&self, reference: &ModuleReference) -> Result<(), EngineError> {
        match reference {
            ModuleReference::Local { .. } => Ok(()),
            ModuleReference::Oci(_) => Err(EngineError::UnsupportedTarget),
        }
    }

    fn in_cache(&self, reference: &ModuleReference) -> bool {
        matches!(reference, ModuleReference::Local { .. })
    }

    fn local_path(&self, reference: &ModuleReference) -> Option<PathBuf> {
        match reference {
            ModuleReference::Local { path } => Some(PathBuf::from(path)),
            ModuleReference::Oci(_) => None,
        }
    }
}

pub struct OciRegistry<'a> {
    config: &'a EngineConfig,
}

impl<'a> OciRegistry<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        OciRegistry { config }
    }

    fn blob_client(&self, oci: &OciReference) -> Result<HttpBlobClient, EngineError> {
        let credential = self
            .config
            .auth
            .get(&oci.registry)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoCredential));
        HttpBlobClient::new(oci.registry.clone(), oci.repository.clone(), credential)
    }

    async fn restore(&self, reference: &ModuleReference) -> Result<(), EngineError> {
        if !self.config.registry_enabled {
            return Err(EngineError::FeatureDisabled);
        }
        let oci = crate::reference::require_oci(reference)?;
        let client: Arc<dyn BlobClient> = Arc::new(self.blob_client(oci)?);
        ArtifactManager::new(client, self.config).pull(oci).await
    }

    async fn in_cache(&self, reference: &ModuleReference) -> bool {
        match reference {
            ModuleReference::Oci(oci) => CacheEntry::locate(&self.config.cache_root, oci).is_populated().await,
            ModuleReference::Local { .. } => false,
        }
    }

    fn local_path(&self, reference: &ModuleReference) -> Option<PathBuf> {
        match reference {
            ModuleReference::Oci(oci) => Some(CacheEntry::locate(&self.config.cache_root, oci).path().to_path_buf()),
            ModuleReference::Local { .. } => None,
        }
    }
}
