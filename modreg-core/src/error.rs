use std::sync::Arc;

use crate::reference::ModuleReference;

// batch-restore failures are never raised to the caller; stored per reference and retrieved
// with ModuleDispatcher::try_get_error
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("malformed reference: {0}")]
    Malformed(String),

    #[error("unsupported target scheme for this command")]
    UnsupportedTarget,

    #[error("OCI registry support is disabled (BICEP_REGISTRY_ENABLED_EXPERIMENTAL=false)")]
    FeatureDisabled,

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("artifact is not a bicep module (config media_type or size mismatch): {0}")]
    NotABicepModule(String),

    #[error("integrity check failed: {0}")]
    IntegrityError(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("local io error: {0}")]
    LocalIo(String),

    #[error("already disposed")]
    AlreadyDisposed,

    #[error("unhandled error: {0}")]
    Unhandled(String),
}

impl EngineError {
    pub fn unhandled(e: impl std::fmt::Display) -> Self {
        EngineError::Unhandled(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::LocalIo(e.to_string())
    }
}

pub type ReferenceErrorMap = std::collections::HashMap<ModuleReference, Arc<EngineError>>;
