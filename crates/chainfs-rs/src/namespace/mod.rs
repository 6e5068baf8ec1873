//! In-memory directory tree.
//!
//! Inodes live in an arena keyed by ID. Each inode stores its parent ID (the
//! reserved `..` link) and directories map child names to IDs. The root is its
//! own parent, so every upward walk stops when `parent == id`. The reserved
//! `.`/`..` links are implicit and never show up as children.

#[cfg(test)]
mod namespace_tests;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blocks::{BlockId, BlockRegistry};
use crate::constants::{DEFAULT_BASE_DIR, ROOT_ID};
use crate::error::{FsError, FsResult};

pub type InodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeData {
    File {
        replication: usize,
        block_size: u64,
        blocks: Vec<BlockId>,
    },
    Dir {
        children: BTreeMap<String, InodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: InodeId,
    pub name: String,
    pub parent: InodeId,
    pub data: InodeData,
}

impl Inode {
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self.data {
            InodeData::File { .. } => NodeKind::File,
            InodeData::Dir { .. } => NodeKind::Dir,
        }
    }

    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.data, InodeData::Dir { .. })
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        match &self.data {
            InodeData::File { blocks, .. } => blocks,
            InodeData::Dir { .. } => &[],
        }
    }

    fn child(&self, name: &str) -> Option<InodeId> {
        match &self.data {
            InodeData::Dir { children } => children.get(name).copied(),
            InodeData::File { .. } => None,
        }
    }
}

/// Recursive listing returned by the tree command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub path: String,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    inodes: BTreeMap<InodeId, Inode>,
    last_id: InodeId,
    base_dir: String,
}

impl Namespace {
    /// A namespace holding only an empty root directory.
    #[must_use]
    pub fn new(base_dir: &str) -> Self {
        let mut inodes = BTreeMap::new();
        inodes.insert(
            ROOT_ID,
            Inode {
                id: ROOT_ID,
                name: String::new(),
                parent: ROOT_ID,
                data: InodeData::Dir {
                    children: BTreeMap::new(),
                },
            },
        );
        Self {
            inodes,
            last_id: ROOT_ID,
            base_dir: base_dir.to_string(),
        }
    }

    /// Rebuild from detached inodes and `(parent, child)` links.
    ///
    /// Directory `children` maps in `inodes` are ignored and rebuilt from `links`.
    ///
    /// # Errors
    /// Returns an error if the root is missing, a link names an unknown inode
    /// or a non-directory parent.
    pub fn from_parts(
        base_dir: &str,
        inodes: impl IntoIterator<Item = Inode>,
        links: impl IntoIterator<Item = (InodeId, InodeId)>,
    ) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        for mut inode in inodes {
            if let InodeData::Dir { children } = &mut inode.data {
                children.clear();
            }
            inode.parent = inode.id;
            map.insert(inode.id, inode);
        }
        if !map.get(&ROOT_ID).is_some_and(Inode::is_dir) {
            anyhow::bail!("image has no root directory");
        }
        for (parent, child) in links {
            let name = map
                .get(&child)
                .map(|c| c.name.clone())
                .ok_or_else(|| anyhow::anyhow!("link to unknown inode {child}"))?;
            match map.get_mut(&parent).map(|p| &mut p.data) {
                Some(InodeData::Dir { children }) => {
                    children.insert(name, child);
                }
                Some(InodeData::File { .. }) => anyhow::bail!("inode {parent} is not a directory"),
                None => anyhow::bail!("link from unknown inode {parent}"),
            }
            if let Some(c) = map.get_mut(&child) {
                c.parent = parent;
            }
        }
        let last_id = map.keys().next_back().copied().unwrap_or(ROOT_ID);
        Ok(Self {
            inodes: map,
            last_id,
            base_dir: base_dir.to_string(),
        })
    }

    /// Raise the ID counter so IDs of deleted inodes are never handed out again.
    #[must_use]
    pub fn with_last_id(mut self, last_id: InodeId) -> Self {
        self.last_id = self.last_id.max(last_id);
        self
    }

    #[must_use]
    pub const fn last_id(&self) -> InodeId {
        self.last_id
    }

    #[must_use]
    pub const fn root(&self) -> InodeId {
        ROOT_ID
    }

    #[must_use]
    pub fn get(&self, id: InodeId) -> Option<&Inode> {
        self.inodes.get(&id)
    }

    pub fn inodes(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.values()
    }

    #[must_use]
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// Resolve a path to an inode. Never fails hard: any missing segment yields `None`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<InodeId> {
        let segments: Vec<&str> = segments(path).collect();
        self.resolve_segments(&segments)
    }

    /// Split a path into its (resolved) parent directory and leaf name.
    ///
    /// The root path yields the root with an empty leaf.
    #[must_use]
    pub fn split_parent_and_leaf(&self, path: &str) -> Option<(InodeId, String)> {
        let mut segments: Vec<&str> = segments(path).collect();
        let leaf = segments.pop().unwrap_or_default();
        let parent = self.resolve_segments(&segments)?;
        Some((parent, leaf.to_string()))
    }

    fn resolve_segments(&self, parts: &[&str]) -> Option<InodeId> {
        match parts.split_first() {
            Some((&".", rest)) => {
                let base = self.walk(ROOT_ID, segments(&self.base_dir))?;
                self.walk(base, rest.iter().copied())
            }
            _ => self.walk(ROOT_ID, parts.iter().copied()),
        }
    }

    fn walk<'a>(&self, start: InodeId, parts: impl Iterator<Item = &'a str>) -> Option<InodeId> {
        let mut cur = start;
        for part in parts {
            cur = self.inodes.get(&cur)?.child(part)?;
        }
        Some(cur)
    }

    /// Absolute path of an inode, `/` for the root.
    #[must_use]
    pub fn path_of(&self, id: InodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut cur = id;
        for _ in 0..=self.inodes.len() {
            let inode = self.inodes.get(&cur)?;
            if inode.parent == cur {
                names.reverse();
                return Some(format!("/{}", names.join("/")));
            }
            names.push(inode.name.as_str());
            cur = inode.parent;
        }
        None
    }

    fn display_path(&self, parent: InodeId, name: &str) -> String {
        match self.path_of(parent) {
            Some(p) if p == "/" => format!("/{name}"),
            Some(p) => format!("{p}/{name}"),
            None => name.to_string(),
        }
    }

    fn display(&self, id: InodeId) -> String {
        self.path_of(id).unwrap_or_else(|| format!("inode {id}"))
    }

    /// Child IDs of a directory, ordered by name; empty for files.
    #[must_use]
    pub fn children(&self, id: InodeId) -> Vec<InodeId> {
        match self.inodes.get(&id).map(|i| &i.data) {
            Some(InodeData::Dir { children }) => children.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_dir(&self, id: InodeId) -> bool {
        self.inodes.get(&id).is_some_and(Inode::is_dir)
    }

    #[must_use]
    pub fn is_empty_dir(&self, id: InodeId) -> bool {
        matches!(
            self.inodes.get(&id).map(|i| &i.data),
            Some(InodeData::Dir { children }) if children.is_empty()
        )
    }

    #[must_use]
    pub const fn is_root(&self, id: InodeId) -> bool {
        id == ROOT_ID
    }

    /// Whether `ancestor` is `id` itself or lies on the path from `id` to the root.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: InodeId, id: InodeId) -> bool {
        let mut cur = id;
        for _ in 0..=self.inodes.len() {
            if cur == ancestor {
                return true;
            }
            match self.inodes.get(&cur) {
                Some(inode) if inode.parent != cur => cur = inode.parent,
                _ => return false,
            }
        }
        false
    }

    #[must_use]
    pub fn tree(&self, id: InodeId) -> Option<TreeNode> {
        let inode = self.inodes.get(&id)?;
        let children = self
            .children(id)
            .into_iter()
            .filter_map(|child| self.tree(child))
            .collect();
        Some(TreeNode {
            name: inode.name.clone(),
            kind: inode.kind(),
            path: self.path_of(id)?,
            children,
        })
    }

    /// # Errors
    /// Fails if `parent` is not a directory or `name` is invalid or taken.
    pub fn create_directory(&mut self, parent: InodeId, name: &str) -> FsResult<InodeId> {
        let id = self.last_id + 1;
        self.insert_child(
            parent,
            name,
            id,
            InodeData::Dir {
                children: BTreeMap::new(),
            },
        )?;
        Ok(id)
    }

    /// # Errors
    /// Fails if `parent` is not a directory or `name` is invalid or taken.
    pub fn create_file(
        &mut self,
        parent: InodeId,
        name: &str,
        replication: usize,
        block_size: u64,
    ) -> FsResult<InodeId> {
        let id = self.last_id + 1;
        self.insert_child(
            parent,
            name,
            id,
            InodeData::File {
                replication,
                block_size,
                blocks: Vec::new(),
            },
        )?;
        Ok(id)
    }

    /// Insert an inode under a caller-chosen ID. Used by log replay.
    ///
    /// # Errors
    /// Fails like [`Self::create_directory`], or if `id` is already in use.
    pub fn insert_child(
        &mut self,
        parent: InodeId,
        name: &str,
        id: InodeId,
        data: InodeData,
    ) -> FsResult<()> {
        validate_name(name)?;
        if self.inodes.contains_key(&id) {
            return Err(FsError::AlreadyExists(format!("inode {id}")));
        }
        match self.inodes.get(&parent) {
            Some(p) if !p.is_dir() => return Err(FsError::NotADirectory(self.display(parent))),
            Some(p) if p.child(name).is_some() => {
                return Err(FsError::AlreadyExists(self.display_path(parent, name)));
            }
            Some(_) => {}
            None => return Err(FsError::NotFound(format!("inode {parent}"))),
        }
        if let Some(InodeData::Dir { children }) = self.inodes.get_mut(&parent).map(|p| &mut p.data) {
            children.insert(name.to_string(), id);
        }
        self.inodes.insert(
            id,
            Inode {
                id,
                name: name.to_string(),
                parent,
                data,
            },
        );
        self.last_id = self.last_id.max(id);
        Ok(())
    }

    /// Remove an empty, non-root directory from `parent`.
    ///
    /// # Errors
    /// Fails if `child` is not an empty directory directly under `parent`.
    pub fn remove_directory(&mut self, parent: InodeId, child: InodeId) -> FsResult<()> {
        let inode = self
            .inodes
            .get(&child)
            .ok_or_else(|| FsError::NotFound(format!("inode {child}")))?;
        if child == ROOT_ID {
            return Err(FsError::IsRoot(self.display(child)));
        }
        if inode.parent != parent {
            return Err(FsError::NotFound(self.display_path(parent, &inode.name)));
        }
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(self.display(child)));
        }
        if !self.is_empty_dir(child) {
            return Err(FsError::NotEmpty(self.display(child)));
        }
        self.detach(child);
        self.inodes.remove(&child);
        Ok(())
    }

    /// Detach an inode from its parent and drop it with its whole subtree,
    /// releasing every block the subtree owned.
    ///
    /// # Errors
    /// Fails for the root or an unknown inode.
    pub fn remove_inode(&mut self, id: InodeId, blocks: &mut BlockRegistry) -> FsResult<()> {
        if id == ROOT_ID {
            return Err(FsError::IsRoot("/".to_string()));
        }
        if !self.inodes.contains_key(&id) {
            return Err(FsError::NotFound(format!("inode {id}")));
        }
        self.detach(id);
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(inode) = self.inodes.remove(&cur) else {
                continue;
            };
            match inode.data {
                InodeData::File { blocks: ids, .. } => {
                    for block in ids {
                        blocks.release(block);
                    }
                }
                InodeData::Dir { children } => stack.extend(children.into_values()),
            }
        }
        Ok(())
    }

    /// Re-parent `src` under `dest_parent` with a new name.
    ///
    /// # Errors
    /// Fails for the root, a destination inside `src`'s own subtree, a
    /// non-directory destination, or a name already taken there.
    pub fn move_inode(&mut self, src: InodeId, dest_parent: InodeId, name: &str) -> FsResult<()> {
        if !self.inodes.contains_key(&src) {
            return Err(FsError::NotFound(format!("inode {src}")));
        }
        if src == ROOT_ID {
            return Err(FsError::IsRoot("/".to_string()));
        }
        let dest = self
            .inodes
            .get(&dest_parent)
            .ok_or_else(|| FsError::NotFound(format!("inode {dest_parent}")))?;
        if !dest.is_dir() {
            return Err(FsError::NotADirectory(self.display(dest_parent)));
        }
        if self.is_ancestor(src, dest_parent) {
            return Err(FsError::InvalidMove {
                src: self.display(src),
                dst: self.display_path(dest_parent, name),
            });
        }
        validate_name(name)?;
        if dest.child(name).is_some() {
            return Err(FsError::AlreadyExists(self.display_path(dest_parent, name)));
        }

        self.detach(src);
        if let Some(InodeData::Dir { children }) =
            self.inodes.get_mut(&dest_parent).map(|p| &mut p.data)
        {
            children.insert(name.to_string(), src);
        }
        if let Some(inode) = self.inodes.get_mut(&src) {
            inode.parent = dest_parent;
            inode.name = name.to_string();
        }
        Ok(())
    }

    /// Append a block to a file's block list.
    ///
    /// # Errors
    /// Fails if `id` is unknown or a directory.
    pub fn add_block(&mut self, id: InodeId, block: BlockId) -> FsResult<()> {
        let path = self.display(id);
        match self.inodes.get_mut(&id).map(|i| &mut i.data) {
            Some(InodeData::File { blocks, .. }) => {
                blocks.push(block);
                Ok(())
            }
            Some(InodeData::Dir { .. }) => Err(FsError::IsADirectory(path)),
            None => Err(FsError::NotFound(path)),
        }
    }

    fn detach(&mut self, id: InodeId) {
        let Some((parent, name)) = self.inodes.get(&id).map(|i| (i.parent, i.name.clone())) else {
            return;
        };
        if let Some(InodeData::Dir { children }) = self.inodes.get_mut(&parent).map(|p| &mut p.data)
        {
            if children.get(&name) == Some(&id) {
                children.remove(&name);
            }
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim().split('/').filter(|s| !s.is_empty())
}

fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}
