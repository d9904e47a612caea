use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::error::{EngineError, ReferenceErrorMap};
use crate::reference::{self, ModuleReference};
use crate::registry;

// skips already-cached entries, restores the rest concurrently (bounded by
// config.download_semaphore down in ArtifactManager), records failures per reference
pub struct ModuleDispatcher {
    config: EngineConfig,
    errors: Mutex<ReferenceErrorMap>,
}

impl ModuleDispatcher {
    pub fn new(config: EngineConfig) -> Self {
        ModuleDispatcher { config, errors: Mutex::new(HashMap::new()) }
    }

    pub fn valid_references(&self, candidates: &[String]) -> Vec<ModuleReference> {
        candidates.iter().filter_map(|s| reference::parse(s).ok()).collect()
    }

    // returns whether any pull was attempted, regardless of individual outcomes
    pub async fn restore(&self, references: &[ModuleReference]) -> bool {
        let mut missing = Vec::new();
        for reference in references {
            let registry = registry::dispatch(reference, &self.config);
            if !registry.in_cache(reference).await {
                missing.push(reference.clone());
            }
        }

        if missing.is_empty() {
            return false;
        }

        let mut set = JoinSet::new();
        for reference in missing {
            let config = self.config.clone();
            set.spawn(async move {
                let registry = registry::dispatch(&reference, &config);
                let result = registry.restore(&reference).await;
                (reference, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((reference, Ok(()))) => {
                    self.errors.lock().unwrap().remove(&reference);
                }
                Ok((reference, Err(e))) => {
                    warn!("restore failed for {reference}: {e}");
                    self.errors.lock().unwrap().insert(reference, Arc::new(e));
                }
                Err(join_err) => {
                    warn!("restore task panicked: {join_err}");
                }
            }
        }

        true
    }

    pub fn try_get_error(&self, reference: &ModuleReference) -> Option<Arc<EngineError>> {
        self.errors.lock().unwrap().get(reference).cloned()
    }

    pub fn try_get_local_path(&self, reference: &ModuleReference) -> Option<std::path::PathBuf> {
        registry::dispatch(reference, &self.config).local_path(reference)
    }
}
