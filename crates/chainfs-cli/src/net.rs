//! Length-prefixed frames over tokio streams.

use anyhow::Context;
use bytes::Bytes;
use chainfs_rs::constants::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use chainfs_rs::error::ProtocolError;
use chainfs_rs::packet::encode_frame;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream before the header.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Bytes>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                need: FRAME_HEADER_LEN,
                have: filled,
            }
            .into());
        }
        filled += n;
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        }
        .into());
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("read frame payload")?;
    Ok(Some(Bytes::from(payload)))
}

pub async fn send_message<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(msg).context("encode message")?;
    write_frame(writer, &body).await
}

pub async fn recv_message<R, T>(reader: &mut R) -> anyhow::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader)
        .await?
        .context("connection closed before message")?;
    serde_json::from_slice(&frame).context("decode message")
}

/// One request, one response, on a fresh connection.
pub async fn call<Req, Resp>(addr: &str, req: &Req) -> anyhow::Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to {addr}"))?;
    send_message(&mut stream, req).await?;
    recv_message(&mut stream).await
}
