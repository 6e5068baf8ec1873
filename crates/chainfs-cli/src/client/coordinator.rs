//! Typed calls to the coordinator.

use anyhow::{anyhow, bail};
use chainfs_rs::namespace::InodeId;
use chainfs_rs::protocol::{LocatedBlock, Request, Response};

use crate::net::call;

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    addr: String,
}

impl CoordinatorClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Send a request; a `Failed` reply becomes an error.
    pub async fn request(&self, req: &Request) -> anyhow::Result<Response> {
        match call(&self.addr, req).await? {
            Response::Failed { kind, message } => {
                Err(anyhow!("{} failed ({kind:?}): {message}", req.name()))
            }
            resp => Ok(resp),
        }
    }

    pub async fn create(&self, path: &str) -> anyhow::Result<InodeId> {
        match self.request(&Request::Create { path: path.to_string() }).await? {
            Response::Created { inode_id } => Ok(inode_id),
            other => bail!("unexpected create response: {other:?}"),
        }
    }

    pub async fn create_complete(&self, path: &str) -> anyhow::Result<()> {
        self.request(&Request::CreateComplete {
            path: path.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn add_block(&self, inode_id: InodeId, num_bytes: u64) -> anyhow::Result<LocatedBlock> {
        match self
            .request(&Request::AddBlock {
                inode_id,
                num_bytes,
            })
            .await?
        {
            Response::BlockAllocated { block } => Ok(block),
            other => bail!("unexpected add_block response: {other:?}"),
        }
    }

    pub async fn block_locations(&self, path: &str) -> anyhow::Result<Vec<LocatedBlock>> {
        match self
            .request(&Request::GetBlockLocations {
                path: path.to_string(),
            })
            .await?
        {
            Response::BlockLocations { blocks } => Ok(blocks),
            other => bail!("unexpected block locations response: {other:?}"),
        }
    }
}
