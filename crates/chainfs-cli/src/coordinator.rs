//! Coordinator TCP front: one framed JSON request per connection.

use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use chainfs_rs::namesystem::Namesystem;
use chainfs_rs::protocol::{Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::net::{recv_message, send_message};

pub type SharedNamesystem = Arc<Mutex<Namesystem>>;

pub async fn serve(listener: TcpListener, namesystem: SharedNamesystem) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "coordinator listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let namesystem = Arc::clone(&namesystem);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, namesystem).await {
                warn!(%peer, "coordinator connection failed: {err:#}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, namesystem: SharedNamesystem) -> anyhow::Result<()> {
    let req: Request = recv_message(&mut stream).await?;
    debug!(cmd = req.name(), "request");
    let resp: Response = tokio::task::spawn_blocking(move || {
        let mut ns = namesystem
            .lock()
            .map_err(|_| anyhow!("namesystem lock poisoned"))?;
        anyhow::Ok(ns.handle(req))
    })
    .await
    .context("namesystem handler panicked")??;
    send_message(&mut stream, &resp).await
}

/// Snapshot on shutdown so the next start has nothing to replay.
pub fn checkpoint(namesystem: &SharedNamesystem) -> anyhow::Result<()> {
    namesystem
        .lock()
        .map_err(|_| anyhow!("namesystem lock poisoned"))?
        .checkpoint()
}
