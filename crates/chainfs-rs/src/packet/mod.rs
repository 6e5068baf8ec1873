//! Pipeline packets and the length-prefixed framing shared by every chain hop.
//!
//! Frame layout: 4-byte big-endian payload length followed by the payload.
//!
//! Message payloads (all integers big-endian):
//! - data: `0x01 | seqno u64 | last u8 | block_id u64 | n u16 | n x target | len u32 | bytes`
//! - ack:  `0x02 | seqno u64`
//!
//! A target is `id u64 | addr_len u16 | addr | name_len u16 | name`.


use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use crate::daemons::DaemonInfo;
use crate::error::ProtocolError;

const TAG_DATA: u8 = 0x01;
const TAG_ACK: u8 = 0x02;

/// One sequence-numbered slice of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsPacket {
    seqno: u64,
    data: Bytes,
    last_in_block: bool,
}

impl DfsPacket {
    #[must_use]
    pub const fn new(seqno: u64, data: Bytes, last_in_block: bool) -> Self {
        Self {
            seqno,
            data,
            last_in_block,
        }
    }

    #[must_use]
    pub const fn seqno(&self) -> u64 {
        self.seqno
    }

    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub const fn is_last_in_block(&self) -> bool {
        self.last_in_block
    }

    /// Wrap this packet for transmission to the head of a chain.
    #[must_use]
    pub fn to_frame(&self, block_id: u64, targets: &[DaemonInfo]) -> DataFrame {
        DataFrame {
            seqno: self.seqno,
            last_in_block: self.last_in_block,
            block_id,
            targets: targets.to_vec(),
            data: self.data.clone(),
        }
    }
}

/// Hands out packet sequence numbers for one streamer instance.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: u64,
}

impl SequenceGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub const fn next_seqno(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Data packet as it travels through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub seqno: u64,
    pub last_in_block: bool,
    pub block_id: u64,
    pub targets: Vec<DaemonInfo>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMessage {
    Data(DataFrame),
    Ack { seqno: u64 },
}

impl PipelineMessage {
    /// # Errors
    /// Returns an error if a string field does not fit its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        match self {
            Self::Data(frame) => {
                buf.put_u8(TAG_DATA);
                buf.put_u64(frame.seqno);
                buf.put_u8(u8::from(frame.last_in_block));
                buf.put_u64(frame.block_id);
                let count = u16::try_from(frame.targets.len())
                    .map_err(|_| ProtocolError::FieldTooLong(frame.targets.len()))?;
                buf.put_u16(count);
                for target in &frame.targets {
                    buf.put_u64(target.id);
                    put_str(&mut buf, &target.address)?;
                    put_str(&mut buf, &target.name)?;
                }
                let len = u32::try_from(frame.data.len())
                    .map_err(|_| ProtocolError::FieldTooLong(frame.data.len()))?;
                buf.put_u32(len);
                buf.put_slice(&frame.data);
            }
            Self::Ack { seqno } => {
                buf.put_u8(TAG_ACK);
                buf.put_u64(*seqno);
            }
        }
        Ok(buf)
    }

    /// # Errors
    /// Returns an error for unknown tags, short payloads or invalid strings.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut cur = Cursor { buf: payload };
        match cur.u8()? {
            TAG_DATA => {
                let seqno = cur.u64()?;
                let last_in_block = cur.u8()? != 0;
                let block_id = cur.u64()?;
                let count = cur.u16()?;
                let mut targets = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let id = cur.u64()?;
                    let address = cur.string()?;
                    let name = cur.string()?;
                    targets.push(DaemonInfo { id, address, name });
                }
                let len = cur.u32()? as usize;
                let data = Bytes::copy_from_slice(cur.take(len)?);
                Ok(Self::Data(DataFrame {
                    seqno,
                    last_in_block,
                    block_id,
                    targets,
                    data,
                }))
            }
            TAG_ACK => Ok(Self::Ack { seqno: cur.u64()? }),
            tag => Err(ProtocolError::UnknownTag(tag)),
        }
    }

    /// Encode and length-prefix in one step.
    ///
    /// # Errors
    /// Returns an error if the message cannot be encoded or framed.
    pub fn to_frame_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(&self.encode()?)
    }
}

/// Prefix `payload` with its big-endian length.
///
/// # Errors
/// Returns an error if the payload exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    // MAX_FRAME_LEN fits in u32, so the cast is lossless.
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Accumulates stream bytes and yields complete frames.
///
/// A partial trailing frame stays buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held that do not yet form a complete frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// # Errors
    /// Returns an error if the next frame header announces an oversized frame.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Extract every complete frame currently buffered.
    ///
    /// # Errors
    /// Returns an error if a frame header announces an oversized frame.
    pub fn drain_frames(&mut self) -> Result<Vec<Bytes>, ProtocolError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Decode every complete frame as a [`PipelineMessage`].
    ///
    /// # Errors
    /// Returns an error for oversized frames or undecodable payloads.
    pub fn drain_messages(&mut self) -> Result<Vec<PipelineMessage>, ProtocolError> {
        self.drain_frames()?
            .iter()
            .map(|frame| PipelineMessage::decode(frame))
            .collect()
    }
}

fn put_str(buf: &mut Vec<u8>, value: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated {
                need: n,
                have: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let mut raw = self.take(2)?;
        Ok(raw.get_u16())
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let mut raw = self.take(4)?;
        Ok(raw.get_u32())
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let mut raw = self.take(8)?;
        Ok(raw.get_u64())
    }

    fn string(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.u16()?);
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}
