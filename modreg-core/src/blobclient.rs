use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{error, trace};
use reqwest::{Method, StatusCode, header};

use crate::descriptor::Descriptor;
use crate::digest::{self, Digest};
use crate::error::EngineError;
use crate::manifest::OCI_IMAGE_MANIFEST_MEDIA_TYPE;

const DOCKER_CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

// acquisition/refresh happens outside the engine; this just exposes whatever token is current
pub trait TokenCredential: Send + Sync {
    fn token(&self) -> Option<String>;
}

pub struct NoCredential;

impl TokenCredential for NoCredential {
    fn token(&self) -> Option<String> {
        None
    }
}

pub struct ManifestDownload {
    pub digest_header: Option<Digest>,
    pub data: Bytes,
}

pub struct BlobUpload {
    pub digest: Digest,
}

pub struct ManifestUploadTarget<'a> {
    pub media_type: &'a str,
    pub tag: Option<&'a str>,
}

// one attempt per call, no retries in here; that's a caller concern
#[async_trait::async_trait]
pub trait BlobClient: Send + Sync {
    async fn download_manifest(
        &self,
        reference_or_digest: &str,
        accept_media_type: &str,
    ) -> Result<ManifestDownload, EngineError>;

    async fn download_blob(&self, digest: &Digest) -> Result<Bytes, EngineError>;

    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobUpload, EngineError>;

    async fn upload_manifest(&self, bytes: Bytes, target: ManifestUploadTarget<'_>) -> Result<(), EngineError>;
}

// a 404 on manifest/blob download maps to ModuleNotFound, everything else to Transport
pub struct HttpBlobClient {
    client: reqwest::Client,
    registry: String,
    repository: String,
    credential: Arc<dyn TokenCredential>,
}

impl HttpBlobClient {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(2))
            .https_only(true)
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(HttpBlobClient { client, registry: registry.into(), repository: repository.into(), credential })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credential.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn blob_url(&self, digest: &Digest) -> String {
        format!("https://{}/v2/{}/blobs/{}", self.registry, self.repository, digest)
    }

    fn manifest_url(&self, reference_or_digest: &str) -> String {
        format!("https://{}/v2/{}/manifests/{}", self.registry, self.repository, reference_or_digest)
    }
}

#[async_trait::async_trait]
impl BlobClient for HttpBlobClient {
    async fn download_manifest(
        &self,
        reference_or_digest: &str,
        accept_media_type: &str,
    ) -> Result<ManifestDownload, EngineError> {
        let url = self.manifest_url(reference_or_digest);
        trace!("GET {url}");
        let req = self.authed(self.client.request(Method::GET, &url)).header(header::ACCEPT, accept_media_type);
        let response = req.send().await.map_err(|e| EngineError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let digest_header = response
                    .headers()
                    .get(DOCKER_CONTENT_DIGEST_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(Digest::parse);
                let data = response.bytes().await.map_err(|e| EngineError::Transport(e.to_string()))?;
                Ok(ManifestDownload { digest_header, data })
            }
            StatusCode::NOT_FOUND => Err(EngineError::ModuleNotFound(reference_or_digest.to_string())),
            status => {
                error!("download_manifest {url} got status {status}");
                Err(EngineError::Transport(format!("status {status}")))
            }
        }
    }

    async fn download_blob(&self, digest: &Digest) -> Result<Bytes, EngineError> {
        let url = self.blob_url(digest);
        trace!("GET {url}");
        let req = self.authed(self.client.request(Method::GET, &url));
        let response = req.send().await.map_err(|e| EngineError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response.bytes().await.map_err(|e| EngineError::Transport(e.to_string())),
            StatusCode::NOT_FOUND => Err(EngineError::ModuleNotFound(digest.to_string())),
            status => {
                error!("download_blob {url} got status {status}");
                Err(EngineError::Transport(format!("status {status}")))
            }
        }
    }

    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobUpload, EngineError> {
        let digest = digest::compute_digest_bytes(&bytes);
        let url = format!("https://{}/v2/{}/blobs/uploads/?digest={}", self.registry, self.repository, digest);
        trace!("POST {url}");
        let req = self.authed(self.client.request(Method::POST, &url)).body(bytes);
        let response = req.send().await.map_err(|e| EngineError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Transport(format!("status {}", response.status())));
        }
        Ok(BlobUpload { digest })
    }

    async fn upload_manifest(&self, bytes: Bytes, target: ManifestUploadTarget<'_>) -> Result<(), EngineError> {
        if target.media_type != OCI_IMAGE_MANIFEST_MEDIA_TYPE {
            return Err(EngineError::InvalidManifest(format!("unsupported media type {}", target.media_type)));
        }
        let reference = target.tag.unwrap_or("latest");
        let url = self.manifest_url(reference);
        trace!("PUT {url}");
        let req = self
            .authed(self.client.request(Method::PUT, &url))
            .header(header::CONTENT_TYPE, target.media_type)
            .body(bytes);
        let response = req.send().await.map_err(|e| EngineError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Transport(format!("status {}", response.status())));
        }
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryState {
    blobs_by_digest: HashMap<String, Bytes>,
    manifests_by_digest: HashMap<String, Bytes>,
    // tag -> (storage key into manifests_by_digest, digest header the server would claim)
    tag_to_digest: HashMap<String, (String, String)>,
}

// three maps, good enough for tests
#[derive(Clone, Default)]
pub struct InMemoryBlobClient {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBlobClient {
    pub fn new() -> Self {
        Self::default()
    }

    // reachable both by digest and by tag, as a real registry would be after a push
    pub fn seed_manifest(&self, tag: &str, bytes: Bytes) -> Digest {
        let digest = digest::compute_digest_bytes(&bytes);
        let mut state = self.state.lock().unwrap();
        state.manifests_by_digest.insert(digest.as_str().to_string(), bytes);
        state
            .tag_to_digest
            .insert(tag.to_string(), (digest.as_str().to_string(), digest.as_str().to_string()));
        digest
    }

    pub fn seed_blob(&self, bytes: Bytes) -> Digest {
        let digest = digest::compute_digest_bytes(&bytes);
        self.state.lock().unwrap().blobs_by_digest.insert(digest.as_str().to_string(), bytes);
        digest
    }

    // tag resolves to a claimed digest that doesn't match the actual body; exercises the
    // integrity-check failure path
    pub fn seed_manifest_with_claimed_digest(&self, tag: &str, bytes: Bytes, claimed_digest: Digest) {
        let actual_digest = digest::compute_digest_bytes(&bytes);
        let mut state = self.state.lock().unwrap();
        state.manifests_by_digest.insert(actual_digest.as_str().to_string(), bytes);
        state
            .tag_to_digest
            .insert(tag.to_string(), (actual_digest.as_str().to_string(), claimed_digest.as_str().to_string()));
    }
}

#[async_trait::async_trait]
impl BlobClient for InMemoryBlobClient {
    async fn download_manifest(
        &self,
        reference_or_digest: &str,
        _accept_media_type: &str,
    ) -> Result<ManifestDownload, EngineError> {
        let state = self.state.lock().unwrap();
        let (storage_key, header_digest) = if reference_or_digest.starts_with("sha256:") {
            (reference_or_digest.to_string(), reference_or_digest.to_string())
        } else {
            state
                .tag_to_digest
                .get(reference_or_digest)
                .cloned()
                .ok_or_else(|| EngineError::ModuleNotFound(reference_or_digest.to_string()))?
        };
        let data = state
            .manifests_by_digest
            .get(&storage_key)
            .cloned()
            .ok_or_else(|| EngineError::ModuleNotFound(reference_or_digest.to_string()))?;
        Ok(ManifestDownload {
            digest_header: Digest::parse(&header_digest),
            data,
        })
    }

    async fn download_blob(&self, digest: &Digest) -> Result<Bytes, EngineError> {
        self.state
            .lock()
            .unwrap()
            .blobs_by_digest
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| EngineError::ModuleNotFound(digest.to_string()))
    }

    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobUpload, EngineError> {
        Ok(BlobUpload { digest: self.seed_blob(bytes) })
    }

    async fn upload_manifest(&self, bytes: Bytes, target: ManifestUploadTarget<'_>) -> Result<(), EngineError> {
        if target.media_type != OCI_IMAGE_MANIFEST_MEDIA_TYPE {
            return Err(EngineError::InvalidManifest(format!("unsupported media type {}", target.media_type)));
        }
        let tag = target.tag.unwrap_or("latest");
        self.seed_manifest(tag, bytes);
        Ok(())
    }
}
