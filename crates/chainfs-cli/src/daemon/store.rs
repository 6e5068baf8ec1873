//! On-disk block files of one storage daemon.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chainfs_rs::blocks::BlockId;
use chainfs_rs::constants::{block_file_name, parse_block_file_name};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BlockStore {
    dir: PathBuf,
}

impl BlockStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create block dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, id: BlockId) -> PathBuf {
        self.dir.join(block_file_name(id))
    }

    /// IDs of every block file present, ascending.
    pub async fn list(&self) -> anyhow::Result<Vec<BlockId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("list {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = entry.file_name().to_str().and_then(parse_block_file_name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Write a complete block durably, replacing any earlier copy.
    pub async fn write(&self, id: BlockId, data: &[u8]) -> anyhow::Result<()> {
        let path = self.path(id);
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename to {}", path.display()))?;
        debug!(block = id, bytes = data.len(), "block persisted");
        Ok(())
    }

    /// Open a block for reading; `None` if this daemon does not hold it.
    pub async fn open_block(&self, id: BlockId) -> anyhow::Result<Option<File>> {
        match File::open(self.path(id)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("open block {id}")),
        }
    }
}
