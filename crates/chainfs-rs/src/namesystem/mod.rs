//! Coordinator state machine: namespace, blocks and daemons behind one request handler.
//!
//! Every mutating request is validated against memory, appended to the edit
//! log and only then applied, through the same code path log replay uses.


use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::blocks::{BlockId, BlockRegistry};
use crate::constants::{DEFAULT_BASE_DIR, DEFAULT_BLOCK_SIZE, DEFAULT_REPLICATION, IMAGE_FILENAME};
use crate::daemons::{DaemonInfo, DaemonRegistry};
use crate::editlog::{EditLog, EditLogEntry, replay};
use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::namespace::{Inode, InodeData, InodeId, Namespace};
use crate::protocol::{DirEntry, LocatedBlock, Request, Response};

#[derive(Debug, Clone)]
pub struct NamesystemConfig {
    pub meta_dir: PathBuf,
    pub replication: usize,
    pub block_size: u64,
    pub base_dir: String,
}

impl NamesystemConfig {
    pub fn new(meta_dir: impl Into<PathBuf>) -> Self {
        Self {
            meta_dir: meta_dir.into(),
            replication: DEFAULT_REPLICATION,
            block_size: DEFAULT_BLOCK_SIZE,
            base_dir: DEFAULT_BASE_DIR.to_string(),
        }
    }
}

pub struct Namesystem {
    config: NamesystemConfig,
    namespace: Namespace,
    blocks: BlockRegistry,
    daemons: DaemonRegistry,
    log: EditLog,
}

impl Namesystem {
    /// Load the image, replay pending edits, then checkpoint.
    ///
    /// # Errors
    /// Fails if the metadata directory is unreadable or the log does not
    /// replay cleanly on top of the image.
    pub fn open(config: NamesystemConfig) -> anyhow::Result<Self> {
        Self::open_with_daemons(config, DaemonRegistry::new())
    }

    /// Like [`Self::open`] with a caller-supplied daemon registry (seeded placement).
    ///
    /// # Errors
    /// See [`Self::open`].
    pub fn open_with_daemons(
        config: NamesystemConfig,
        daemons: DaemonRegistry,
    ) -> anyhow::Result<Self> {
        let mut log = EditLog::open(&config.meta_dir)?;
        let image_path = config.meta_dir.join(IMAGE_FILENAME);
        let (mut namespace, mut blocks, image_seq) = match Image::load(&image_path)? {
            Some(image) => {
                let (namespace, blocks) = image.restore(&config.base_dir)?;
                (namespace, blocks, image.last_seq)
            }
            None => (Namespace::new(&config.base_dir), BlockRegistry::new(), 0),
        };
        log.resume_after(image_seq);

        // Records left behind by an interrupted checkpoint are already in the image.
        let (covered, records): (Vec<_>, Vec<_>) = log
            .pending()?
            .into_iter()
            .partition(|r| r.seq <= image_seq);
        if !covered.is_empty() {
            debug!(skipped = covered.len(), image_seq, "edit records already in image");
        }
        replay(&records, &mut namespace, &mut blocks).context("replay edit log")?;
        info!(
            meta_dir = %config.meta_dir.display(),
            inodes = namespace.inode_count(),
            blocks = blocks.len(),
            replayed = records.len(),
            "namespace loaded"
        );

        let mut this = Self {
            config,
            namespace,
            blocks,
            daemons,
            log,
        };
        this.checkpoint()?;
        Ok(this)
    }

    /// Write a fresh image of the current state and drop every edit record.
    ///
    /// The image records the last sequence number it contains, so a crash
    /// before the records are gone leaves them ignored on the next open.
    ///
    /// # Errors
    /// Fails if the image cannot be written or a record cannot be removed.
    pub fn checkpoint(&mut self) -> anyhow::Result<()> {
        let path = self.config.meta_dir.join(IMAGE_FILENAME);
        Image::capture(&self.namespace, &self.blocks)
            .through(self.log.last_seq())
            .save(&path)?;
        let removed = self.log.truncate()?;
        debug!(removed, "edit log truncated");
        Ok(())
    }

    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub const fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    #[must_use]
    pub const fn config(&self) -> &NamesystemConfig {
        &self.config
    }

    /// Serve one request. Failures come back as [`Response::Failed`] and
    /// leave state and log untouched.
    pub fn handle(&mut self, req: Request) -> Response {
        let cmd = req.name();
        match self.dispatch(req) {
            Ok(resp) => resp,
            Err(err) => {
                warn!(cmd, error = %err, "request failed");
                err.into()
            }
        }
    }

    fn dispatch(&mut self, req: Request) -> FsResult<Response> {
        match req {
            Request::List { path } => self.list(&path),
            Request::Mkdir { path } => self.mkdir(&path),
            Request::Rmdir { path } => self.rmdir(&path),
            Request::Create { path } => self.create(&path),
            Request::CreateComplete { path } => self.create_complete(&path),
            Request::Remove { path } => self.remove(&path),
            Request::Rename { src, dst } => self.rename(&src, &dst),
            Request::Tree { path } => {
                let id = self.lookup(&path)?;
                let root = self
                    .namespace
                    .tree(id)
                    .ok_or_else(|| FsError::NotFound(path.clone()))?;
                Ok(Response::Tree { root })
            }
            Request::RegisterDaemon {
                address,
                name,
                blocks,
            } => Ok(Response::Registered {
                daemon: self.register_daemon(&address, &name, &blocks),
            }),
            Request::AddBlock {
                inode_id,
                num_bytes,
            } => self.add_block(inode_id, num_bytes),
            Request::GetBlockLocations { path } => self.block_locations(&path),
            Request::Exists { path } => Ok(flag(self.namespace.resolve(&path).is_some())),
            Request::IsDir { path } => Ok(flag(
                self.namespace
                    .resolve(&path)
                    .is_some_and(|id| self.namespace.is_dir(id)),
            )),
            Request::IsDirEmpty { path } => Ok(flag(
                self.namespace
                    .resolve(&path)
                    .is_some_and(|id| self.namespace.is_empty_dir(id)),
            )),
            Request::IsIdentical { path1, path2 } => {
                let a = self.namespace.resolve(&path1);
                Ok(flag(a.is_some() && a == self.namespace.resolve(&path2)))
            }
            Request::IsRoot { path } => Ok(flag(
                self.namespace
                    .resolve(&path)
                    .is_some_and(|id| self.namespace.is_root(id)),
            )),
        }
    }

    fn lookup(&self, path: &str) -> FsResult<InodeId> {
        self.namespace
            .resolve(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn inode(&self, path: &str) -> FsResult<&Inode> {
        let id = self.lookup(path)?;
        self.namespace
            .get(id)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn file(&self, path: &str) -> FsResult<&Inode> {
        let inode = self.inode(path)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        Ok(inode)
    }

    /// Append `entry` to the log, then apply it in memory.
    ///
    /// Entries are validated before they get here and `apply` checks before it
    /// mutates, so a failed apply leaves memory untouched; its record is
    /// discarded so that replay never meets it.
    fn commit(&mut self, entry: EditLogEntry) -> FsResult<()> {
        let seq = self
            .log
            .append(entry.clone())
            .map_err(|e| FsError::Storage(format!("{e:#}")))?;
        if let Err(err) = entry.apply(&mut self.namespace, &mut self.blocks) {
            self.log
                .discard(seq)
                .map_err(|e| FsError::Storage(format!("discard edit {seq}: {e:#}")))?;
            return Err(FsError::Storage(format!("apply edit {seq}: {err:#}")));
        }
        Ok(())
    }

    fn list(&self, path: &str) -> FsResult<Response> {
        let inode = self.inode(path)?;
        let ids = if inode.is_dir() {
            self.namespace.children(inode.id)
        } else {
            vec![inode.id]
        };
        let entries = ids
            .into_iter()
            .filter_map(|id| {
                let child = self.namespace.get(id)?;
                Some(DirEntry {
                    name: child.name.clone(),
                    path: self.namespace.path_of(id)?,
                    kind: child.kind(),
                })
            })
            .collect();
        Ok(Response::Listing { entries })
    }

    /// Resolve the parent of a path that is about to be created.
    fn new_entry_parent(&self, path: &str) -> FsResult<(InodeId, String)> {
        let (parent, leaf) = self
            .namespace
            .split_parent_and_leaf(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if !self.namespace.is_dir(parent) {
            let shown = self.namespace.path_of(parent).unwrap_or_default();
            return Err(FsError::NotADirectory(shown));
        }
        if leaf.is_empty() || self.namespace.resolve(path).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        if leaf == "." || leaf == ".." {
            return Err(FsError::InvalidName(leaf));
        }
        Ok((parent, leaf))
    }

    fn mkdir(&mut self, path: &str) -> FsResult<Response> {
        let (parent, name) = self.new_entry_parent(path)?;
        let inode = self.namespace.last_id() + 1;
        self.commit(EditLogEntry::CreateDir {
            parent,
            name,
            inode,
        })?;
        info!(path, inode, "directory created");
        Ok(Response::Created { inode_id: inode })
    }

    fn create(&mut self, path: &str) -> FsResult<Response> {
        let (parent, name) = self.new_entry_parent(path)?;
        let inode = self.namespace.last_id() + 1;
        self.commit(EditLogEntry::CreateFile {
            parent,
            name,
            inode,
            replication: self.config.replication,
            block_size: self.config.block_size,
        })?;
        info!(path, inode, "file created");
        Ok(Response::Created { inode_id: inode })
    }

    fn rmdir(&mut self, path: &str) -> FsResult<Response> {
        let inode = self.inode(path)?;
        let (id, parent) = (inode.id, inode.parent);
        if self.namespace.is_root(id) {
            return Err(FsError::IsRoot(path.to_string()));
        }
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if !self.namespace.is_empty_dir(id) {
            return Err(FsError::NotEmpty(path.to_string()));
        }
        self.commit(EditLogEntry::RemoveDir { parent, inode: id })?;
        info!(path, inode = id, "directory removed");
        Ok(done(format!("{path}: directory removed")))
    }

    fn remove(&mut self, path: &str) -> FsResult<Response> {
        let id = self.lookup(path)?;
        if self.namespace.is_root(id) {
            return Err(FsError::IsRoot(path.to_string()));
        }
        let blocks = self.file(path)?.blocks().len();
        self.commit(EditLogEntry::RemoveInode { inode: id })?;
        info!(path, inode = id, blocks, "file removed");
        Ok(done(format!("{path}: removed")))
    }

    fn rename(&mut self, src: &str, dst: &str) -> FsResult<Response> {
        let id = self.lookup(src)?;
        if self.namespace.is_root(id) {
            return Err(FsError::IsRoot(src.to_string()));
        }
        let (dest_parent, name) = self.new_entry_parent(dst)?;
        if self.namespace.is_ancestor(id, dest_parent) {
            return Err(FsError::InvalidMove {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
        self.commit(EditLogEntry::Move {
            inode: id,
            dest_parent,
            name,
        })?;
        info!(src, dst, inode = id, "renamed");
        Ok(done(format!("{src}: moved to {dst}")))
    }

    fn create_complete(&self, path: &str) -> FsResult<Response> {
        let inode = self.file(path)?;
        let bytes: u64 = inode
            .blocks()
            .iter()
            .filter_map(|&b| self.blocks.get(b))
            .map(|b| b.num_bytes)
            .sum();
        info!(path, blocks = inode.blocks().len(), bytes, "file complete");
        Ok(done(format!("{path}: {bytes} bytes written")))
    }

    fn register_daemon(&mut self, address: &str, name: &str, blocks: &[BlockId]) -> DaemonInfo {
        let info = self.daemons.register(address, name);
        for &block in blocks {
            self.blocks.add_replica(block, info.id);
        }
        info!(daemon = info.id, reported = blocks.len(), "block report applied");
        info
    }

    fn add_block(&mut self, inode_id: InodeId, num_bytes: u64) -> FsResult<Response> {
        let replication = match self.namespace.get(inode_id).map(|i| &i.data) {
            Some(InodeData::File { replication, .. }) => *replication,
            Some(InodeData::Dir { .. }) => {
                return Err(FsError::IsADirectory(self.display(inode_id)));
            }
            None => return Err(FsError::NotFound(format!("inode {inode_id}"))),
        };
        let locations = self.daemons.select_replica_set(replication)?;
        let block = self.blocks.next_id();
        self.commit(EditLogEntry::AddBlock {
            inode: inode_id,
            block,
            num_bytes,
        })?;
        for daemon in &locations {
            self.blocks.add_replica(block, daemon.id);
        }
        info!(
            inode = inode_id,
            block,
            num_bytes,
            pipeline = ?locations.iter().map(|d| d.id).collect::<Vec<_>>(),
            "block allocated"
        );
        Ok(Response::BlockAllocated {
            block: LocatedBlock {
                block_id: block,
                num_bytes,
                locations,
            },
        })
    }

    fn block_locations(&self, path: &str) -> FsResult<Response> {
        let inode = self.file(path)?;
        let blocks = inode
            .blocks()
            .iter()
            .filter_map(|&id| self.blocks.get(id))
            .map(|b| LocatedBlock {
                block_id: b.id,
                num_bytes: b.num_bytes,
                locations: b
                    .replicas
                    .iter()
                    .filter_map(|&d| self.daemons.get(d).cloned())
                    .collect(),
            })
            .collect();
        Ok(Response::BlockLocations { blocks })
    }

    fn display(&self, id: InodeId) -> String {
        self.namespace
            .path_of(id)
            .unwrap_or_else(|| format!("inode {id}"))
    }
}

fn flag(value: bool) -> Response {
    Response::Flag { value }
}

fn done(message: String) -> Response {
    Response::Done { message }
}
