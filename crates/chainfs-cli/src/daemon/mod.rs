//! Storage daemon: registers its blocks with the coordinator, then serves
//! pipeline writes and block reads.

pub mod pipeline;
pub mod store;

use std::path::PathBuf;

use anyhow::{Context, bail};
use chainfs_rs::blocks::BlockId;
use chainfs_rs::constants::BUF_LEN;
use chainfs_rs::daemons::DaemonInfo;
use chainfs_rs::protocol::{DaemonRequest, Request, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::net::{call, recv_message};
use store::BlockStore;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub name: String,
    pub data_dir: PathBuf,
    pub coordinator: String,
    /// Address announced to the coordinator; defaults to the bound address.
    pub advertise: Option<String>,
}

pub struct Daemon {
    listener: TcpListener,
    store: BlockStore,
    info: DaemonInfo,
}

impl Daemon {
    /// Open `<data_dir>/<name>/` and report its blocks to the coordinator.
    pub async fn register(listener: TcpListener, config: &DaemonConfig) -> anyhow::Result<Self> {
        let address = match &config.advertise {
            Some(addr) => addr.clone(),
            None => listener.local_addr()?.to_string(),
        };
        let store = BlockStore::open(config.data_dir.join(&config.name)).await?;
        let blocks = store.list().await?;
        let reported = blocks.len();

        let req = Request::RegisterDaemon {
            address,
            name: config.name.clone(),
            blocks,
        };
        let resp: Response = call(&config.coordinator, &req)
            .await
            .context("register with coordinator")?;
        let info = match resp {
            Response::Registered { daemon } => daemon,
            Response::Failed { message, .. } => bail!("registration refused: {message}"),
            other => bail!("unexpected registration response: {other:?}"),
        };
        info!(
            id = info.id,
            name = %info.name,
            address = %info.address,
            dir = %store.dir().display(),
            reported,
            "daemon registered"
        );
        Ok(Self {
            listener,
            store,
            info,
        })
    }

    pub const fn info(&self) -> &DaemonInfo {
        &self.info
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, store).await {
                    warn!(%peer, "daemon connection failed: {err:#}");
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, store: BlockStore) -> anyhow::Result<()> {
    let req: DaemonRequest = recv_message(&mut stream).await?;
    match req {
        DaemonRequest::SetupWrite { block_id, targets } => {
            debug!(block = block_id, downstream = targets.len(), "write pipeline setup");
            pipeline::run(stream, block_id, targets, store).await
        }
        DaemonRequest::Read {
            block_id,
            offset,
            length,
        } => serve_read(stream, &store, block_id, offset, length).await,
    }
}

async fn serve_read(
    mut stream: TcpStream,
    store: &BlockStore,
    block_id: BlockId,
    offset: u64,
    length: u64,
) -> anyhow::Result<()> {
    let Some(mut file) = store.open_block(block_id).await? else {
        warn!(block = block_id, "read of missing block");
        return Ok(());
    };
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut remaining = length;
    let mut buf = vec![0u8; BUF_LEN];
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(BUF_LEN, |r| r.min(BUF_LEN));
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    stream.shutdown().await?;
    debug!(block = block_id, offset, sent = length - remaining, "block read served");
    Ok(())
}
