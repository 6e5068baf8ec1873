//! Namespace snapshot (`fsimage.json`).


use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blocks::{BlockId, BlockRegistry};
use crate::namespace::{Inode, InodeData, InodeId, Namespace};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub id: BlockId,
    pub num_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageBody {
    Dir,
    File {
        replication: usize,
        block_size: u64,
        blocks: Vec<ImageBlock>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInode {
    pub id: InodeId,
    pub name: String,
    #[serde(flatten)]
    pub body: ImageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDirectory {
    pub parent: InodeId,
    pub children: Vec<InodeId>,
}

/// Full metadata state minus replica locations, which daemons re-report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Highest edit record already folded into this image.
    #[serde(default)]
    pub last_seq: u64,
    pub last_inode_id: InodeId,
    pub inodes: Vec<ImageInode>,
    pub directories: Vec<ImageDirectory>,
    pub free_blocks: Vec<BlockId>,
}

impl Image {
    #[must_use]
    pub fn capture(ns: &Namespace, blocks: &BlockRegistry) -> Self {
        let mut inodes = Vec::with_capacity(ns.inode_count());
        let mut directories = Vec::new();
        for inode in ns.inodes() {
            let body = match &inode.data {
                InodeData::Dir { children } => {
                    directories.push(ImageDirectory {
                        parent: inode.id,
                        children: children.values().copied().collect(),
                    });
                    ImageBody::Dir
                }
                InodeData::File {
                    replication,
                    block_size,
                    blocks: ids,
                } => ImageBody::File {
                    replication: *replication,
                    block_size: *block_size,
                    blocks: ids
                        .iter()
                        .map(|&id| ImageBlock {
                            id,
                            num_bytes: blocks.get(id).map_or(0, |b| b.num_bytes),
                        })
                        .collect(),
                },
            };
            inodes.push(ImageInode {
                id: inode.id,
                name: inode.name.clone(),
                body,
            });
        }
        Self {
            last_seq: 0,
            last_inode_id: ns.last_id(),
            inodes,
            directories,
            free_blocks: blocks.free_ids(),
        }
    }

    /// Mark every edit record up to `seq` as contained in this image.
    #[must_use]
    pub const fn through(mut self, seq: u64) -> Self {
        self.last_seq = seq;
        self
    }

    /// Rebuild the namespace and block registry this image describes.
    ///
    /// # Errors
    /// Fails if the directory links are inconsistent with the inode list.
    pub fn restore(&self, base_dir: &str) -> anyhow::Result<(Namespace, BlockRegistry)> {
        let mut blocks = BlockRegistry::with_free_ids(self.free_blocks.iter().copied());
        let inodes = self.inodes.iter().map(|img| {
            let data = match &img.body {
                ImageBody::Dir => InodeData::Dir {
                    children: Default::default(),
                },
                ImageBody::File {
                    replication,
                    block_size,
                    blocks: list,
                } => {
                    for b in list {
                        blocks.restore(b.id, img.id, b.num_bytes);
                    }
                    InodeData::File {
                        replication: *replication,
                        block_size: *block_size,
                        blocks: list.iter().map(|b| b.id).collect(),
                    }
                }
            };
            Inode {
                id: img.id,
                name: img.name.clone(),
                parent: img.id,
                data,
            }
        });
        let inodes: Vec<Inode> = inodes.collect();
        let links = self
            .directories
            .iter()
            .flat_map(|d| d.children.iter().map(move |&c| (d.parent, c)));
        let ns = Namespace::from_parts(base_dir, inodes, links)
            .context("rebuild namespace")?
            .with_last_id(self.last_inode_id);
        Ok((ns, blocks))
    }

    /// Read an image; `None` if none has been written yet.
    ///
    /// # Errors
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        let body = match fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let image = serde_json::from_slice(&body)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(image))
    }

    /// Write to a sibling temp file, sync, then rename over `path`.
    ///
    /// # Errors
    /// Fails on any I/O error; an existing image is left untouched.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(self).context("encode image")?;
        let mut file = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(&body)
            .with_context(|| format!("write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
        info!(
            path = %path.display(),
            last_seq = self.last_seq,
            inodes = self.inodes.len(),
            free_blocks = self.free_blocks.len(),
            "image saved"
        );
        Ok(())
    }
}
