use std::path::{Path, PathBuf};

use log::{info, trace};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::EngineError;
use crate::reference::OciReference;

// one dir per (cache_root, registry, repository_segments.., tag), one file per layer.
// `a/b:c` and `a:b` collide once segments are path-joined; not handled.
#[derive(Clone)]
pub struct CacheEntry {
    dir: PathBuf,
}

impl CacheEntry {
    pub fn locate(cache_root: &Path, reference: &OciReference) -> Self {
        let mut dir = cache_root.join(&reference.registry);
        for segment in reference.repository_segments() {
            dir.push(segment);
        }
        dir.push(&reference.tag);
        CacheEntry { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub async fn has_file(&self, file_name: &str) -> bool {
        fs::metadata(self.file_path(file_name)).await.is_ok()
    }

    // used by the dispatcher's cache-presence filter
    pub async fn is_populated(&self) -> bool {
        match fs::read_dir(&self.dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
            Err(_) => false,
        }
    }

    pub async fn ensure_dir(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    // write to a sibling .tmp then rename, so a reader never sees a partial layer
    pub async fn write_file(&self, file_name: &str, bytes: &[u8]) -> Result<(), EngineError> {
        let final_path = self.file_path(file_name);
        let tmp_path = self.file_path(&format!("{file_name}.tmp"));
        trace!("writing cache file {}", final_path.display());

        let mut tmp = fs::File::create(&tmp_path).await?;
        let write_result = tmp.write_all(bytes).await;
        drop(tmp);
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        info!("cache populated: {}", final_path.display());
        Ok(())
    }

    pub async fn read_file(&self, file_name: &str) -> Result<Vec<u8>, EngineError> {
        Ok(fs::read(self.file_path(file_name)).await?)
    }
}
