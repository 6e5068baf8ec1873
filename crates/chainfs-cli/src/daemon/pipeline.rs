//! One daemon's part in a chained block write.
//!
//! Bytes from upstream are relayed downstream untouched and decoded locally
//! into the block buffer. Acks flow back the other way. The tail of the chain
//! acks every packet it decodes; other nodes relay downstream acks once they
//! have decoded that packet themselves. The ack for the block's last packet is
//! only released after the local block file is on disk.

use anyhow::{Context, bail, ensure};
use bytes::BytesMut;
use chainfs_rs::blocks::BlockId;
use chainfs_rs::constants::BUF_LEN;
use chainfs_rs::daemons::DaemonInfo;
use chainfs_rs::packet::{FrameBuffer, PipelineMessage};
use chainfs_rs::protocol::{DaemonRequest, SetupAck};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

use super::store::BlockStore;
use crate::net::{recv_message, send_message};

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    decoded_upto: Option<u64>,
    last_seqno: Option<u64>,
    persisted: bool,
}

impl Progress {
    fn can_release(&self, seqno: u64) -> bool {
        self.decoded_upto.is_some_and(|d| d >= seqno)
            && (self.last_seqno != Some(seqno) || self.persisted)
    }
}

/// Where decoded packets are reported.
enum Sink<W> {
    /// Middle of the chain: forward bytes and publish progress for the ack relay.
    Relay {
        downstream: W,
        progress: watch::Sender<Progress>,
    },
    /// Tail of the chain: ack straight back upstream.
    Tail { upstream: W },
}

impl<W: AsyncWrite + Unpin> Sink<W> {
    async fn forward(&mut self, raw: &[u8]) -> anyhow::Result<()> {
        if let Self::Relay { downstream, .. } = self {
            downstream
                .write_all(raw)
                .await
                .context("relay to downstream")?;
        }
        Ok(())
    }

    async fn decoded(&mut self, seqno: u64, last: bool) -> anyhow::Result<()> {
        match self {
            Self::Relay { progress, .. } => {
                progress.send_modify(|p| {
                    p.decoded_upto = Some(seqno);
                    if last {
                        p.last_seqno = Some(seqno);
                    }
                });
                Ok(())
            }
            Self::Tail { upstream } if !last => send_ack(upstream, seqno).await,
            Self::Tail { .. } => Ok(()),
        }
    }

    async fn persisted(&mut self, seqno: u64) -> anyhow::Result<()> {
        match self {
            Self::Relay { progress, .. } => {
                progress.send_modify(|p| p.persisted = true);
                Ok(())
            }
            Self::Tail { upstream } => send_ack(upstream, seqno).await,
        }
    }
}

async fn send_ack<W: AsyncWrite + Unpin>(writer: &mut W, seqno: u64) -> anyhow::Result<()> {
    let frame = PipelineMessage::Ack { seqno }.to_frame_bytes()?;
    writer.write_all(&frame).await.context("send ack upstream")?;
    Ok(())
}

/// Join the pipeline for `block_id`, then receive the block.
pub async fn run(
    upstream: TcpStream,
    block_id: BlockId,
    targets: Vec<DaemonInfo>,
    store: BlockStore,
) -> anyhow::Result<()> {
    let (up_read, mut up_write) = upstream.into_split();

    let downstream = match join_downstream(block_id, &targets).await {
        Ok(downstream) => downstream,
        Err(err) => {
            send_message(&mut up_write, &SetupAck::failed(block_id, format!("{err:#}"))).await?;
            return Err(err);
        }
    };
    send_message(&mut up_write, &SetupAck::joined(block_id)).await?;

    match downstream {
        Some(stream) => {
            let (down_read, down_write) = stream.into_split();
            let (progress_tx, progress_rx) = watch::channel(Progress::default());
            let sink = Sink::Relay {
                downstream: down_write,
                progress: progress_tx,
            };
            tokio::try_join!(
                receive(up_read, sink, block_id, &store),
                relay_acks(down_read, up_write, progress_rx),
            )?;
        }
        None => {
            receive(up_read, Sink::Tail { upstream: up_write }, block_id, &store).await?;
        }
    }
    Ok(())
}

/// Connect to the next hop and wait until the rest of the chain has joined.
async fn join_downstream(
    block_id: BlockId,
    targets: &[DaemonInfo],
) -> anyhow::Result<Option<TcpStream>> {
    let Some((next, rest)) = targets.split_first() else {
        return Ok(None);
    };
    let mut stream = TcpStream::connect(&next.address)
        .await
        .with_context(|| format!("connect to downstream {}", next.address))?;
    send_message(
        &mut stream,
        &DaemonRequest::SetupWrite {
            block_id,
            targets: rest.to_vec(),
        },
    )
    .await?;
    await_setup(&mut stream, block_id).await?;
    debug!(block = block_id, next = %next.address, "downstream joined");
    Ok(Some(stream))
}

/// Read the setup reply of the hop below and surface its failure.
pub async fn await_setup<R: AsyncRead + Unpin>(
    stream: &mut R,
    block_id: BlockId,
) -> anyhow::Result<()> {
    let ack: SetupAck = recv_message(stream).await?;
    ensure!(
        ack.block_id == block_id,
        "setup acked for block {}, expected {block_id}",
        ack.block_id
    );
    if let Some(err) = ack.error {
        bail!("pipeline setup for block {block_id} failed: {err}");
    }
    Ok(())
}

async fn receive<R, W>(
    mut upstream: R,
    mut sink: Sink<W>,
    block_id: BlockId,
    store: &BlockStore,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut block = BytesMut::new();
    let mut packets = 0u64;
    let mut buf = vec![0u8; BUF_LEN];
    loop {
        let n = upstream.read(&mut buf).await?;
        if n == 0 {
            bail!("upstream closed before the last packet of block {block_id}");
        }
        sink.forward(&buf[..n]).await?;
        frames.extend(&buf[..n]);
        for msg in frames.drain_messages()? {
            let PipelineMessage::Data(frame) = msg else {
                bail!("unexpected ack from upstream for block {block_id}");
            };
            ensure!(
                frame.block_id == block_id,
                "packet {} belongs to block {}, expected {block_id}",
                frame.seqno,
                frame.block_id
            );
            block.extend_from_slice(&frame.data);
            packets += 1;
            sink.decoded(frame.seqno, frame.last_in_block).await?;
            if frame.last_in_block {
                store.write(block_id, &block).await?;
                sink.persisted(frame.seqno).await?;
                info!(block = block_id, bytes = block.len(), packets, "block received");
                return Ok(());
            }
        }
    }
}

async fn relay_acks<R, W>(
    mut downstream: R,
    mut upstream: W,
    mut progress: watch::Receiver<Progress>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; BUF_LEN];
    loop {
        let n = downstream.read(&mut buf).await?;
        if n == 0 {
            bail!("downstream closed before acking the last packet");
        }
        frames.extend(&buf[..n]);
        for msg in frames.drain_messages()? {
            let PipelineMessage::Ack { seqno } = msg else {
                bail!("unexpected data packet from downstream");
            };
            progress
                .wait_for(|p| p.can_release(seqno))
                .await
                .context("local receive stopped")?;
            send_ack(&mut upstream, seqno).await?;
            let done = progress.borrow().last_seqno == Some(seqno);
            if done {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chainfs_rs::packet::DfsPacket;
    use tempfile::TempDir;
    use tokio::io::duplex;

    fn data_frame(block_id: BlockId, seqno: u64, data: &'static [u8], last: bool) -> Vec<u8> {
        let packet = DfsPacket::new(seqno, Bytes::from_static(data), last);
        PipelineMessage::Data(packet.to_frame(block_id, &[]))
            .to_frame_bytes()
            .expect("frame")
    }

    async fn read_acks<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u64> {
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; 256];
        let mut acks = Vec::new();
        loop {
            let n = reader.read(&mut buf).await.expect("read");
            if n == 0 {
                return acks;
            }
            frames.extend(&buf[..n]);
            for msg in frames.drain_messages().expect("decode") {
                match msg {
                    PipelineMessage::Ack { seqno } => acks.push(seqno),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[test]
    fn last_ack_waits_for_persist() {
        let mut p = Progress::default();
        assert!(!p.can_release(1));
        p.decoded_upto = Some(3);
        assert!(p.can_release(2));
        p.last_seqno = Some(3);
        assert!(!p.can_release(3));
        p.persisted = true;
        assert!(p.can_release(3));
    }

    #[tokio::test]
    async fn tail_acks_every_packet_and_persists() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlockStore::open(dir.path()).await.expect("store");
        let (mut client, daemon_in) = duplex(1024);
        let (daemon_out, client_in) = duplex(1024);

        let mut input = data_frame(5, 10, b"abc", false);
        input.extend(data_frame(5, 11, b"de", true));
        client.write_all(&input).await.expect("send");

        let sink = Sink::Tail {
            upstream: daemon_out,
        };
        receive(daemon_in, sink, 5, &store).await.expect("receive");
        assert_eq!(read_acks(client_in).await, vec![10, 11]);
        assert_eq!(
            std::fs::read(store.path(5)).expect("block file"),
            b"abcde".to_vec()
        );
    }

    #[tokio::test]
    async fn early_end_of_stream_is_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlockStore::open(dir.path()).await.expect("store");
        let (mut client, daemon_in) = duplex(1024);
        let (daemon_out, _client_in) = duplex(1024);
        client
            .write_all(&data_frame(5, 1, b"abc", false))
            .await
            .expect("send");
        drop(client);

        let err = receive(daemon_in, Sink::Tail { upstream: daemon_out }, 5, &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("before the last packet"));
        assert!(store.open_block(5).await.expect("open").is_none());
    }

    #[tokio::test]
    async fn packet_for_other_block_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = BlockStore::open(dir.path()).await.expect("store");
        let (mut client, daemon_in) = duplex(1024);
        let (daemon_out, _client_in) = duplex(1024);
        client
            .write_all(&data_frame(6, 1, b"x", true))
            .await
            .expect("send");

        let err = receive(daemon_in, Sink::Tail { upstream: daemon_out }, 5, &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 5"));
    }

    #[tokio::test]
    async fn setup_failure_below_is_surfaced() {
        let (mut below, mut here) = duplex(256);
        let reason = "connect to downstream 127.0.0.1:9".to_string();
        send_message(&mut below, &SetupAck::failed(7, reason))
            .await
            .expect("send");
        let err = await_setup(&mut here, 7).await.unwrap_err();
        assert!(err.to_string().contains("connect to downstream"));
    }

    #[tokio::test]
    async fn setup_ack_for_other_block_is_rejected() {
        let (mut below, mut here) = duplex(256);
        send_message(&mut below, &SetupAck::joined(8)).await.expect("send");
        let err = await_setup(&mut here, 7).await.unwrap_err();
        assert!(err.to_string().contains("expected 7"));
    }
}
