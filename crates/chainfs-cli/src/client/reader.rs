//! Block reads straight from a storage daemon.

use anyhow::Context;
use chainfs_rs::blocks::BlockId;
use chainfs_rs::daemons::DaemonInfo;
use chainfs_rs::protocol::DaemonRequest;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::warn;

use crate::net::send_message;

/// Read up to `length` bytes of a block starting at `offset`.
///
/// The daemon closes the connection when done, so a short result means the
/// replica is missing or truncated.
pub async fn read_block(
    daemon: &DaemonInfo,
    block_id: BlockId,
    offset: u64,
    length: u64,
) -> anyhow::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(&daemon.address)
        .await
        .with_context(|| format!("connect to {}", daemon.address))?;
    send_message(
        &mut stream,
        &DaemonRequest::Read {
            block_id,
            offset,
            length,
        },
    )
    .await?;
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .await
        .with_context(|| format!("read block {block_id} from {}", daemon.name))?;
    if (data.len() as u64) < length {
        warn!(
            block = block_id,
            daemon = %daemon.name,
            wanted = length,
            got = data.len(),
            "short block read"
        );
    }
    Ok(data)
}
