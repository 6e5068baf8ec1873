//! Write-ahead log of namespace mutations.
//!
//! Each record is a standalone JSON file `edits_<seq:08>` in the metadata
//! directory, synced before the mutating request is answered.


use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocks::{BlockId, BlockRegistry};
use crate::constants::{edit_log_file_name, parse_edit_log_file_name};
use crate::namespace::{InodeData, InodeId, Namespace};

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditLogEntry {
    CreateDir {
        parent: InodeId,
        name: String,
        inode: InodeId,
    },
    RemoveDir {
        parent: InodeId,
        inode: InodeId,
    },
    CreateFile {
        parent: InodeId,
        name: String,
        inode: InodeId,
        replication: usize,
        block_size: u64,
    },
    RemoveInode {
        inode: InodeId,
    },
    AddBlock {
        inode: InodeId,
        block: BlockId,
        num_bytes: u64,
    },
    Move {
        inode: InodeId,
        dest_parent: InodeId,
        name: String,
    },
}

impl EditLogEntry {
    /// Re-apply a logged mutation.
    ///
    /// # Errors
    /// Fails if the entry does not fit the current state, which means the log
    /// and the image it follows disagree.
    pub fn apply(&self, ns: &mut Namespace, blocks: &mut BlockRegistry) -> anyhow::Result<()> {
        match self {
            Self::CreateDir {
                parent,
                name,
                inode,
            } => ns.insert_child(
                *parent,
                name,
                *inode,
                InodeData::Dir {
                    children: Default::default(),
                },
            )?,
            Self::RemoveDir { parent, inode } => ns.remove_directory(*parent, *inode)?,
            Self::CreateFile {
                parent,
                name,
                inode,
                replication,
                block_size,
            } => ns.insert_child(
                *parent,
                name,
                *inode,
                InodeData::File {
                    replication: *replication,
                    block_size: *block_size,
                    blocks: Vec::new(),
                },
            )?,
            Self::RemoveInode { inode } => ns.remove_inode(*inode, blocks)?,
            Self::AddBlock {
                inode,
                block,
                num_bytes,
            } => {
                ns.add_block(*inode, *block)?;
                blocks.restore(*block, *inode, *num_bytes);
            }
            Self::Move {
                inode,
                dest_parent,
                name,
            } => ns.move_inode(*inode, *dest_parent, name)?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub seq: u64,
    pub entry: EditLogEntry,
}

/// Replay records in order on top of a loaded image.
///
/// # Errors
/// Stops at the first record that does not apply.
pub fn replay(
    records: &[EditRecord],
    ns: &mut Namespace,
    blocks: &mut BlockRegistry,
) -> anyhow::Result<()> {
    for record in records {
        record
            .entry
            .apply(ns, blocks)
            .with_context(|| format!("replay edit record {}", record.seq))?;
    }
    Ok(())
}

pub struct EditLog {
    dir: PathBuf,
    last_seq: u64,
}

impl EditLog {
    /// Open the log in `dir`, creating the directory if needed.
    ///
    /// Numbering continues after the highest record already present.
    ///
    /// # Errors
    /// Fails if the directory cannot be created or listed.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create metadata dir {}", dir.display()))?;
        let last_seq = record_files(&dir)?
            .last()
            .map_or(0, |(seq, _)| *seq);
        Ok(Self { dir, last_seq })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub const fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Durably write one record and return its sequence number.
    ///
    /// # Errors
    /// Fails if the record cannot be written or synced.
    pub fn append(&mut self, entry: EditLogEntry) -> anyhow::Result<u64> {
        let seq = self.last_seq + 1;
        let record = EditRecord { seq, entry };
        let path = self.dir.join(edit_log_file_name(seq));
        let body = serde_json::to_vec(&record).context("encode edit record")?;

        let mut file =
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(&body)
            .with_context(|| format!("write {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", path.display()))?;

        self.last_seq = seq;
        debug!(seq, path = %path.display(), "edit record appended");
        Ok(seq)
    }

    /// Every record on disk, ordered by sequence number.
    ///
    /// # Errors
    /// Fails if a record file cannot be read or parsed.
    pub fn pending(&self) -> anyhow::Result<Vec<EditRecord>> {
        record_files(&self.dir)?
            .into_iter()
            .map(|(seq, path)| {
                let body = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
                let record: EditRecord = serde_json::from_slice(&body)
                    .with_context(|| format!("parse {}", path.display()))?;
                anyhow::ensure!(
                    record.seq == seq,
                    "{} holds record {}",
                    path.display(),
                    record.seq
                );
                Ok(record)
            })
            .collect()
    }

    /// Never hand out a sequence number at or below `seq`.
    pub fn resume_after(&mut self, seq: u64) {
        self.last_seq = self.last_seq.max(seq);
    }

    /// Remove the most recent record, which was never applied.
    ///
    /// # Errors
    /// Fails if `seq` is not the last record or its file cannot be removed.
    pub fn discard(&mut self, seq: u64) -> anyhow::Result<()> {
        anyhow::ensure!(
            seq == self.last_seq,
            "record {seq} is not the last one ({})",
            self.last_seq
        );
        let path = self.dir.join(edit_log_file_name(seq));
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        self.last_seq -= 1;
        debug!(seq, "edit record discarded");
        Ok(())
    }

    /// Delete every record. Numbering carries on from the last one.
    ///
    /// # Errors
    /// Fails if a record file cannot be removed.
    pub fn truncate(&mut self) -> anyhow::Result<usize> {
        let files = record_files(&self.dir)?;
        for (_, path) in &files {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(files.len())
    }
}

fn record_files(dir: &Path) -> anyhow::Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(parse_edit_log_file_name) {
            files.push((seq, entry.path()));
        }
    }
    files.sort_unstable_by_key(|(seq, _)| *seq);
    Ok(files)
}
