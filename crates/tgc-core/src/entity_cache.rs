//! Identity/entity cache backed by a JSON file.
//!
//! Entries never expire; a peer's username or title may go stale until the
//! cache is cleared.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{domain::Entity, ports::ProviderPort, Result};

pub struct EntityCache {
    path: PathBuf,
    provider: Arc<dyn ProviderPort>,
    entries: Mutex<HashMap<String, Entity>>,
}

impl EntityCache {
    /// Load the cache file if present; a missing or empty file starts empty.
    pub fn load(path: impl Into<PathBuf>, provider: Arc<dyn ProviderPort>) -> Result<Self> {
        let path = path.into();
        let entries = load_cache_file(&path)?;
        Ok(Self {
            path,
            provider,
            entries: Mutex::new(entries),
        })
    }

    /// Cached entity for `peer_id`, resolving and persisting it on a miss.
    pub async fn get_or_resolve(&self, peer_id: i64) -> Result<Entity> {
        let key = peer_id.to_string();
        let mut entries = self.entries.lock().await;
        if let Some(hit) = entries.get(&key) {
            return Ok(hit.clone());
        }

        let entity = self.provider.resolve_entity(peer_id).await?;
        tracing::debug!(peer_id, "entity cache miss, resolved from provider");
        entries.insert(key, entity.clone());
        save_cache_file(&self.path, &entries)?;
        Ok(entity)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.clear();
        save_cache_file(&self.path, &entries)
    }
}

fn load_cache_file(path: &Path) -> Result<HashMap<String, Entity>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn save_cache_file(path: &Path, entries: &HashMap<String, Entity>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let txt = serde_json::to_string(entries)?;
    std::fs::write(path, txt)?;
    Ok(())
}
