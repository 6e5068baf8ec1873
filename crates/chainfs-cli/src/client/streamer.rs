//! Client side of a chained write.
//!
//! A producer cuts the source into packets and queues them for a single
//! worker. The worker buffers one block's packets, allocates the block, opens
//! a pipeline to its first replica and streams the packets, mirroring each
//! seqno into a bounded pending-ack queue as it is sent. The next block starts
//! only after every packet of the current one has been acked in order.

use anyhow::{Context, bail, ensure};
use bytes::BytesMut;
use chainfs_rs::constants::BUF_LEN;
use chainfs_rs::namespace::InodeId;
use chainfs_rs::packet::{DfsPacket, FrameBuffer, PipelineMessage, SequenceGenerator};
use chainfs_rs::protocol::{DaemonRequest, LocatedBlock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::ClientConfig;
use super::coordinator::CoordinatorClient;
use crate::daemon::pipeline::await_setup;
use crate::net::send_message;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub blocks: Vec<LocatedBlock>,
    pub bytes: u64,
}

pub struct DataStreamer {
    coordinator: CoordinatorClient,
    inode: InodeId,
    config: ClientConfig,
    seq: SequenceGenerator,
}

impl DataStreamer {
    pub fn new(coordinator: CoordinatorClient, inode: InodeId, config: ClientConfig) -> Self {
        Self {
            coordinator,
            inode,
            config,
            seq: SequenceGenerator::new(),
        }
    }

    /// Stream `source` to the end, one block at a time.
    pub async fn write_all<R: AsyncRead + Unpin>(mut self, source: R) -> anyhow::Result<StreamSummary> {
        ensure!(self.config.block_size > 0, "block size must be positive");
        ensure!(self.config.packet_size > 0, "packet size must be positive");
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let block_size = self.config.block_size;
        let packet_size = self.config.packet_size;
        let producer = produce(source, tx, &mut self.seq, block_size, packet_size);
        let worker = consume(rx, &self.coordinator, self.inode, self.config.queue_capacity);
        let ((), summary) = tokio::try_join!(producer, worker)?;
        info!(
            inode = self.inode,
            blocks = summary.blocks.len(),
            bytes = summary.bytes,
            "stream complete"
        );
        Ok(summary)
    }
}

/// Split `source` into packets. A packet closes its block when the block is
/// full or the source is exhausted; one byte of lookahead tells the two apart.
async fn produce<R: AsyncRead + Unpin>(
    mut source: R,
    tx: mpsc::Sender<DfsPacket>,
    seq: &mut SequenceGenerator,
    block_size: u64,
    packet_size: usize,
) -> anyhow::Result<()> {
    let mut pending = BytesMut::new();
    let mut chunk = vec![0u8; BUF_LEN];
    let mut in_block = 0u64;
    let mut eof = false;
    loop {
        let room = usize::try_from(block_size - in_block).unwrap_or(usize::MAX);
        let want = packet_size.min(room);
        while !eof && pending.len() <= want {
            let n = source.read(&mut chunk).await.context("read source")?;
            if n == 0 {
                eof = true;
            } else {
                pending.extend_from_slice(&chunk[..n]);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        let data = pending.split_to(want.min(pending.len())).freeze();
        in_block += data.len() as u64;
        let last = in_block == block_size || (eof && pending.is_empty());
        if last {
            in_block = 0;
        }
        let packet = DfsPacket::new(seq.next_seqno(), data, last);
        if tx.send(packet).await.is_err() {
            bail!("packet worker stopped");
        }
    }
}

async fn consume(
    mut rx: mpsc::Receiver<DfsPacket>,
    coordinator: &CoordinatorClient,
    inode: InodeId,
    queue_capacity: usize,
) -> anyhow::Result<StreamSummary> {
    let mut summary = StreamSummary::default();
    let mut packets = Vec::new();
    let mut block_bytes = 0u64;
    while let Some(packet) = rx.recv().await {
        block_bytes += packet.len() as u64;
        let last = packet.is_last_in_block();
        packets.push(packet);
        if last {
            let located = coordinator.add_block(inode, block_bytes).await?;
            write_block(&located, &packets, queue_capacity).await?;
            summary.bytes += block_bytes;
            summary.blocks.push(located);
            packets.clear();
            block_bytes = 0;
        }
    }
    ensure!(packets.is_empty(), "source ended inside a block");
    Ok(summary)
}

/// Push one block's packets through the pipeline and wait for every ack.
pub async fn write_block(
    block: &LocatedBlock,
    packets: &[DfsPacket],
    queue_capacity: usize,
) -> anyhow::Result<()> {
    let Some(last) = packets.last() else {
        return Ok(());
    };
    let last_seqno = last.seqno();
    let (head, rest) = block
        .locations
        .split_first()
        .with_context(|| format!("block {} has no locations", block.block_id))?;

    let mut stream = TcpStream::connect(&head.address)
        .await
        .with_context(|| format!("connect to {}", head.address))?;
    send_message(
        &mut stream,
        &DaemonRequest::SetupWrite {
            block_id: block.block_id,
            targets: rest.to_vec(),
        },
    )
    .await?;
    await_setup(&mut stream, block.block_id).await?;
    debug!(block = block.block_id, head = %head.address, replicas = block.locations.len(), "pipeline open");

    let (reader, mut writer) = stream.into_split();
    let (pending_tx, pending_rx) = mpsc::channel(queue_capacity.max(1));
    let send = async move {
        for packet in packets {
            pending_tx
                .send(packet.seqno())
                .await
                .context("ack task stopped")?;
            let frame = PipelineMessage::Data(packet.to_frame(block.block_id, rest)).to_frame_bytes()?;
            writer.write_all(&frame).await.context("send packet")?;
        }
        anyhow::Ok(writer)
    };
    let (_writer, ()) = tokio::try_join!(send, await_acks(reader, pending_rx, last_seqno))?;
    debug!(block = block.block_id, packets = packets.len(), "block acknowledged");
    Ok(())
}

async fn await_acks(
    mut reader: OwnedReadHalf,
    mut pending: mpsc::Receiver<u64>,
    last_seqno: u64,
) -> anyhow::Result<()> {
    let mut frames = FrameBuffer::new();
    let mut buf = vec![0u8; BUF_LEN];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            bail!("pipeline closed before packet {last_seqno} was acked");
        }
        frames.extend(&buf[..n]);
        for msg in frames.drain_messages()? {
            let PipelineMessage::Ack { seqno } = msg else {
                bail!("unexpected data packet on the ack stream");
            };
            let expected = pending
                .recv()
                .await
                .with_context(|| format!("ack {seqno} for a packet never sent"))?;
            ensure!(seqno == expected, "ack {seqno} arrived while waiting for {expected}");
            if seqno == last_seqno {
                return Ok(());
            }
        }
    }
}
