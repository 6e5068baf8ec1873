//! Block identity allocation and replica tracking.

#[cfg(test)]
mod blocks_tests;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::BLOCK_ID_START;
use crate::daemons::DaemonId;
use crate::namespace::InodeId;

pub type BlockId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub inode: InodeId,
    pub num_bytes: u64,
    pub replicas: Vec<DaemonId>,
}

/// Active blocks plus the set of reclaimed IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRegistry {
    blocks: HashMap<BlockId, Block>,
    free: BTreeSet<BlockId>,
    last_id: BlockId,
}

impl BlockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            free: BTreeSet::new(),
            last_id: BLOCK_ID_START,
        }
    }

    /// Rebuild from a snapshot's free list; active blocks are added with [`Self::restore`].
    #[must_use]
    pub fn with_free_ids(free: impl IntoIterator<Item = BlockId>) -> Self {
        let free: BTreeSet<BlockId> = free.into_iter().collect();
        let last_id = free.iter().next_back().copied().unwrap_or(BLOCK_ID_START);
        Self {
            blocks: HashMap::new(),
            free,
            last_id,
        }
    }

    /// The ID the next [`Self::allocate`] call will hand out.
    #[must_use]
    pub fn next_id(&self) -> BlockId {
        self.free.first().copied().unwrap_or(self.last_id + 1)
    }

    /// Register a new block with no replicas, reusing a freed ID when one exists.
    pub fn allocate(&mut self, inode: InodeId, num_bytes: u64) -> Block {
        let id = if let Some(id) = self.free.pop_first() {
            id
        } else {
            self.last_id += 1;
            self.last_id
        };
        let block = Block {
            id,
            inode,
            num_bytes,
            replicas: Vec::new(),
        };
        self.blocks.insert(id, block.clone());
        block
    }

    /// Re-insert a block whose ID was assigned earlier (image load or log replay).
    pub fn restore(&mut self, id: BlockId, inode: InodeId, num_bytes: u64) {
        self.free.remove(&id);
        self.last_id = self.last_id.max(id);
        self.blocks.insert(
            id,
            Block {
                id,
                inode,
                num_bytes,
                replicas: Vec::new(),
            },
        );
    }

    pub fn release(&mut self, id: BlockId) {
        if self.blocks.remove(&id).is_some() {
            self.free.insert(id);
        }
    }

    /// Record `daemon` as a holder of `id`; unknown blocks are ignored.
    pub fn add_replica(&mut self, id: BlockId, daemon: DaemonId) {
        match self.blocks.get_mut(&id) {
            Some(block) => {
                if !block.replicas.contains(&daemon) {
                    block.replicas.push(daemon);
                }
            }
            None => debug!(block = id, daemon, "replica report for unknown block dropped"),
        }
    }

    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn is_free(&self, id: BlockId) -> bool {
        self.free.contains(&id)
    }

    /// Reclaimed IDs in ascending order.
    #[must_use]
    pub fn free_ids(&self) -> Vec<BlockId> {
        self.free.iter().copied().collect()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
