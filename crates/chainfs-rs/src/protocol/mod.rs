//! JSON control messages exchanged with the coordinator and with storage daemons.
//!
//! Every message travels as a single length-prefixed frame.

#[cfg(test)]
mod protocol_tests;

use serde::{Deserialize, Serialize};

use crate::blocks::BlockId;
use crate::daemons::DaemonInfo;
use crate::error::{ErrorKind, FsError};
use crate::namespace::{InodeId, NodeKind, TreeNode};

/// Coordinator commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Request {
    List { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Create { path: String },
    CreateComplete { path: String },
    Remove { path: String },
    Rename { src: String, dst: String },
    Tree { path: String },
    RegisterDaemon {
        address: String,
        name: String,
        blocks: Vec<BlockId>,
    },
    AddBlock { inode_id: InodeId, num_bytes: u64 },
    GetBlockLocations { path: String },
    Exists { path: String },
    IsDir { path: String },
    IsDirEmpty { path: String },
    IsIdentical { path1: String, path2: String },
    IsRoot { path: String },
}

impl Request {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Mkdir { .. } => "mkdir",
            Self::Rmdir { .. } => "rmdir",
            Self::Create { .. } => "create",
            Self::CreateComplete { .. } => "create_complete",
            Self::Remove { .. } => "remove",
            Self::Rename { .. } => "rename",
            Self::Tree { .. } => "tree",
            Self::RegisterDaemon { .. } => "register_daemon",
            Self::AddBlock { .. } => "add_block",
            Self::GetBlockLocations { .. } => "get_block_locations",
            Self::Exists { .. } => "exists",
            Self::IsDir { .. } => "is_dir",
            Self::IsDirEmpty { .. } => "is_dir_empty",
            Self::IsIdentical { .. } => "is_identical",
            Self::IsRoot { .. } => "is_root",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
}

/// A block together with the daemons holding it, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlock {
    pub block_id: BlockId,
    pub num_bytes: u64,
    pub locations: Vec<DaemonInfo>,
}

/// Coordinator replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    Listing { entries: Vec<DirEntry> },
    Created { inode_id: InodeId },
    Done { message: String },
    Tree { root: TreeNode },
    Registered { daemon: DaemonInfo },
    BlockAllocated { block: LocatedBlock },
    BlockLocations { blocks: Vec<LocatedBlock> },
    Flag { value: bool },
    Failed { kind: ErrorKind, message: String },
}

impl From<FsError> for Response {
    fn from(err: FsError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Requests served by a storage daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum DaemonRequest {
    /// Join a write pipeline; `targets` are the downstream hops in order.
    SetupWrite {
        block_id: BlockId,
        targets: Vec<DaemonInfo>,
    },
    Read {
        block_id: BlockId,
        offset: u64,
        length: u64,
    },
}

/// Sent upstream once every downstream hop has joined the pipeline, or with
/// `error` set when a hop could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupAck {
    pub block_id: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SetupAck {
    #[must_use]
    pub const fn joined(block_id: BlockId) -> Self {
        Self {
            block_id,
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(block_id: BlockId, error: String) -> Self {
        Self {
            block_id,
            error: Some(error),
        }
    }
}
