//! # shield-store-json
//!
//! Local filesystem implementation of `RecordStore`.
//! Each entity set lives in `<data_dir>/<set name>.json` as one pretty-printed array.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use shield_core::records::EntitySet;
use shield_core::traits::RecordStore;
use tokio::fs;

pub struct JsonFileStore {
    /// Directory holding one file per entity set (e.g., "./data")
    root_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
        }
    }

    /// Creates the data directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root_path)
            .await
            .with_context(|| format!("create data dir {}", store.root_path.display()))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    fn path_for(&self, set: EntitySet) -> PathBuf {
        self.root_path.join(format!("{}.json", set.name()))
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn read(&self, set: EntitySet) -> Option<Vec<u8>> {
        let path = self.path_for(set);
        match fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "record set unreadable");
                None
            }
        }
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// concurrent reader sees either the old or the new set, never half of one.
    async fn write(&self, set: EntitySet, contents: Vec<u8>) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root_path)
            .await
            .with_context(|| format!("create data dir {}", self.root_path.display()))?;

        let target = self.path_for(set);
        let staging = self.root_path.join(format!(".{}.json.tmp", set.name()));
        fs::write(&staging, &contents)
            .await
            .with_context(|| format!("write {}", staging.display()))?;
        fs::rename(&staging, &target)
            .await
            .with_context(|| format!("replace {}", target.display()))?;
        Ok(())
    }
}
