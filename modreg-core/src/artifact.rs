use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};
use tokio::task::JoinSet;

use crate::blobclient::{BlobClient, ManifestUploadTarget};
use crate::cache::CacheEntry;
use crate::config::EngineConfig;
use crate::descriptor::{Annotations, Descriptor, TITLE_ANNOTATION};
use crate::digest::{self, Digest};
use crate::error::EngineError;
use crate::manifest::Manifest;
use crate::reference::OciReference;

// a layer to be pushed: bytes plus the annotations its descriptor should carry
pub struct LayerSource {
    pub bytes: Bytes,
    pub annotations: Annotations,
}

impl LayerSource {
    pub fn titled(title: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let mut annotations = Annotations::new();
        annotations.insert(TITLE_ANNOTATION.to_string(), title.into());
        LayerSource { bytes: bytes.into(), annotations }
    }
}

pub struct ArtifactManager<'a> {
    client: Arc<dyn BlobClient>,
    config: &'a EngineConfig,
}

impl<'a> ArtifactManager<'a> {
    pub fn new(client: Arc<dyn BlobClient>, config: &'a EngineConfig) -> Self {
        ArtifactManager { client, config }
    }

    pub async fn pull(&self, reference: &OciReference) -> Result<(), EngineError> {
        let download = {
            let _permit = self.config.download_semaphore.acquire().await.map_err(EngineError::unhandled)?;
            self.client
                .download_manifest(&reference.tag, &self.config.module_manifest_media_type)
                .await?
        };

        let recomputed = digest::compute_digest_bytes(&download.data);
        match &download.digest_header {
            Some(header) if *header == recomputed => {}
            Some(header) => {
                return Err(EngineError::IntegrityError(format!(
                    "manifest digest mismatch: header={header} recomputed={recomputed}"
                )));
            }
            None => {
                warn!("registry returned no Docker-Content-Digest header for {reference}");
            }
        }

        let manifest = Manifest::from_json_bytes(&download.data)?;
        manifest.validate_is_bicep_module(&self.config.module_config_media_type)?;

        let entry = CacheEntry::locate(&self.config.cache_root, reference);
        entry.ensure_dir().await?;

        // fan out layer downloads, bounded by the engine-wide download semaphore; first failure
        // aborts the rest rather than leaving a half-written cache entry to clean up later
        let mut set = JoinSet::new();
        for layer in manifest.layers.clone() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&self.config.download_semaphore);
            let entry = entry.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(EngineError::unhandled)?;
                let file_name = layer.cache_file_name();
                let bytes = client.download_blob(&layer.digest).await?;
                let actual = digest::compute_digest_bytes(&bytes);
                if actual != layer.digest {
                    return Err(EngineError::IntegrityError(format!(
                        "layer digest mismatch for {file_name}: expected={} actual={actual}",
                        layer.digest
                    )));
                }
                entry.write_file(&file_name, &bytes).await
            });
        }

        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(join_err) => Err(EngineError::unhandled(join_err)),
            };
            if let Err(e) = outcome {
                set.abort_all();
                return Err(e);
            }
        }

        info!("pulled {reference} ({} layers)", manifest.layers.len());
        Ok(())
    }

    pub async fn push(
        &self,
        reference: &OciReference,
        config_bytes: Bytes,
        layers: Vec<LayerSource>,
    ) -> Result<(), EngineError> {
        let config_descriptor = Descriptor::for_bytes(
            self.config.module_config_media_type.clone(),
            &config_bytes,
            Annotations::new(),
        );
        self.client.upload_blob(config_bytes).await?;

        let mut layer_descriptors = Vec::with_capacity(layers.len());
        for layer in layers {
            let descriptor = Descriptor::for_bytes(
                "application/vnd.bicep.module.layer.v1+json",
                &layer.bytes,
                layer.annotations,
            );
            self.client.upload_blob(layer.bytes).await?;
            layer_descriptors.push(descriptor);
        }

        let manifest = Manifest::new(config_descriptor, layer_descriptors);
        let body = manifest.to_json_bytes()?;
        self.client
            .upload_manifest(
                Bytes::from(body),
                ManifestUploadTarget {
                    media_type: &self.config.module_manifest_media_type,
                    tag: Some(&reference.tag),
                },
            )
            .await?;

        info!("pushed {reference} ({} layers)", manifest.layers.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobclient::InMemoryBlobClient;

    fn reference() -> OciReference {
        OciReference { registry: "example.com".into(), repository: "test/x".into(), tag: "v1".into() }
    }

    fn sample_manifest_bytes(config_media_type: &str, layer_bytes: &[u8]) -> (Bytes, Manifest) {
        let config = Descriptor::for_bytes(config_media_type, b"", Annotations::new());
        let mut annotations = Annotations::new();
        annotations.insert(TITLE_ANNOTATION.to_string(), "main.json".to_string());
        let layer = Descriptor::for_bytes("application/vnd.bicep.module.layer.v1+json", layer_bytes, annotations);
        let manifest = Manifest::new(config, vec![layer]);
        (Bytes::from(manifest.to_json_bytes().unwrap()), manifest)
    }

    #[tokio::test]
    async fn pull_happy_path_populates_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(tmp.path().to_path_buf());
        let client = InMemoryBlobClient::new();

        let (manifest_bytes, _) = sample_manifest_bytes(&config.module_config_media_type, b"hello");
        client.seed_manifest("v1", manifest_bytes);
        client.seed_blob(Bytes::from_static(b"hello"));

        let manager = ArtifactManager::new(Arc::new(client), &config);
        manager.pull(&reference()).await.unwrap();

        let entry = CacheEntry::locate(&config.cache_root, &reference());
        assert_eq!(entry.read_file("main.json").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn pull_rejects_manifest_digest_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(tmp.path().to_path_buf());
        let client = InMemoryBlobClient::new();

        let (manifest_bytes, _) = sample_manifest_bytes(&config.module_config_media_type, b"hello");
        let wrong = Digest::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        client.seed_manifest_with_claimed_digest("v1", manifest_bytes, wrong);
        client.seed_blob(Bytes::from_static(b"hello"));

        let manager = ArtifactManager::new(Arc::new(client), &config);
        let err = manager.pull(&reference()).await.unwrap_err();
        assert!(matches!(err, EngineError::IntegrityError(_)));

        let entry = CacheEntry::locate(&config.cache_root, &reference());
        assert!(!entry.is_populated().await);
    }

    #[tokio::test]
    async fn pull_rejects_wrong_config_media_type() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(tmp.path().to_path_buf());
        let client = InMemoryBlobClient::new();

        let (manifest_bytes, _) = sample_manifest_bytes("application/other", b"hello");
        client.seed_manifest("v1", manifest_bytes);
        client.seed_blob(Bytes::from_static(b"hello"));

        let manager = ArtifactManager::new(Arc::new(client), &config);
        let err = manager.pull(&reference()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotABicepModule(_)));
    }

    #[tokio::test]
    async fn push_then_pull_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(tmp.path().to_path_buf());
        let client = InMemoryBlobClient::new();
        let manager = ArtifactManager::new(Arc::new(client), &config);

        let roundtrip_ref = OciReference {
            registry: "example.com".into(),
            repository: "test/roundtrip".into(),
            tag: "v1".into(),
        };

        manager
            .push(
                &roundtrip_ref,
                Bytes::new(),
                vec![LayerSource::titled("main.json", Bytes::from_static(b"X"))],
            )
            .await
            .unwrap();

        manager.pull(&roundtrip_ref).await.unwrap();

        let entry = CacheEntry::locate(&config.cache_root, &roundtrip_ref);
        assert_eq!(entry.read_file("main.json").await.unwrap(), b"X");
    }
}
