//! JSON file backed target store.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::gateway::GuildId;
use crate::persistence::{StoreError, VoiceTarget, VoiceTargetStore};

/// A thread-safe target store persisted to a single JSON file.
///
/// Every mutation rewrites the file. Targets are few (one per guild), so the
/// rewrite cost is negligible next to the voice operations around it.
#[derive(Clone, Default)]
pub struct FileTargetStore {
    inner: Arc<DashMap<GuildId, VoiceTarget>>,
    path: Option<PathBuf>,
}

impl FileTargetStore {
    /// Create an in-memory store with no backing file.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            path,
        }
    }

    /// Load from `path` if it exists, otherwise start empty.
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let file = File::open(path)?;
            let reader = BufReader::new(file);
            let map: HashMap<GuildId, VoiceTarget> = serde_json::from_reader(reader)?;

            for (k, v) in map {
                store.inner.insert(k, v);
            }
            tracing::info!(
                targets = store.inner.len(),
                path = %path.display(),
                "Loaded voice targets from file"
            );
        }
        Ok(store)
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            let file = File::create(path)?;
            let writer = BufWriter::new(file);

            let map: HashMap<_, _> = self
                .inner
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect();

            serde_json::to_writer(writer, &map)?;
        }
        Ok(())
    }

    /// Number of stored targets, enabled or not.
    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl VoiceTargetStore for FileTargetStore {
    async fn load_all_enabled(&self) -> Result<Vec<VoiceTarget>, StoreError> {
        Ok(self
            .inner
            .iter()
            .filter(|r| r.value().enabled)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn save_target(&self, target: &VoiceTarget) -> Result<(), StoreError> {
        self.inner.insert(target.guild_id.clone(), target.clone());
        self.flush()
    }

    async fn set_enabled(&self, guild: &GuildId, enabled: bool) -> Result<bool, StoreError> {
        let found = match self.inner.get_mut(guild) {
            Some(mut entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        };
        if found {
            self.flush()?;
        }
        Ok(found)
    }

    async fn delete_target(&self, guild: &GuildId) -> Result<bool, StoreError> {
        let removed = self.inner.remove(guild).is_some();
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }
}
