//! Frame codec for the envelope wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ flags(1B)│   frame body           │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(flags byte) + sizeof(body), NOT including the 4-byte prefix.
//!
//! An envelope is a run of frames ending at the first frame without
//! [`FLAG_MORE`]. Frames carrying [`FLAG_HEADER`] form the envelope's declared
//! header section and must precede every body frame.

use crate::wire::Envelope;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Another frame of the same envelope follows.
pub const FLAG_MORE: u8 = 0x01;
/// Frame belongs to the envelope's header section.
pub const FLAG_HEADER: u8 = 0x02;

const KNOWN_FLAGS: u8 = FLAG_MORE | FLAG_HEADER;

/// Size limits applied while reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_bytes: u32,
    pub max_envelope_frames: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_envelope_frames: 64,
        }
    }
}

impl From<&crate::types::TransportConfig> for FrameLimits {
    fn from(config: &crate::types::TransportConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            max_envelope_frames: config.max_envelope_frames,
        }
    }
}

fn invalid_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

/// Read one frame from the stream.
///
/// Returns `(flags, body)`. Returns `None` on clean EOF.
/// `max_frame_bytes` caps the maximum accepted body size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<(u8, Bytes)>> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len < 1 {
        return Err(invalid_data("Frame too short: missing flags byte"));
    }
    if frame_len - 1 > max_frame_bytes {
        return Err(invalid_data(format!("Frame too large: {} bytes", frame_len - 1)));
    }

    // Read flags byte + body
    let mut frame_data = vec![0u8; frame_len as usize];
    reader.read_exact(&mut frame_data).await?;

    let flags = frame_data[0];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(invalid_data(format!("Unknown frame flags: 0x{:02X}", flags)));
    }
    let mut body = Bytes::from(frame_data);
    let body = body.split_off(1);

    Ok(Some((flags, body)))
}

/// Write one frame to the stream. Does not flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    flags: u8,
    body: &[u8],
) -> std::io::Result<()> {
    let frame_len = frame_len(body)?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[flags]).await?;
    writer.write_all(body).await?;
    Ok(())
}

fn frame_len(body: &[u8]) -> std::io::Result<u32> {
    u32::try_from(body.len())
        .ok()
        .and_then(|len| len.checked_add(1))
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame body exceeds u32 range")
        })
}

/// Read one complete envelope, draining frames while [`FLAG_MORE`] is set.
///
/// Returns `None` on clean EOF between envelopes. EOF inside an envelope is an
/// `UnexpectedEof` error.
pub async fn read_envelope<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    limits: FrameLimits,
) -> std::io::Result<Option<Envelope>> {
    let mut header = Vec::new();
    let mut body = Vec::new();

    loop {
        let (flags, frame) = match read_frame(reader, limits.max_frame_bytes).await? {
            Some(f) => f,
            None if header.is_empty() && body.is_empty() => return Ok(None),
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed inside an envelope",
                ))
            }
        };

        if header.len() + body.len() >= limits.max_envelope_frames {
            return Err(invalid_data(format!(
                "Envelope exceeds {} frames",
                limits.max_envelope_frames
            )));
        }

        if flags & FLAG_HEADER != 0 {
            if !body.is_empty() {
                return Err(invalid_data("Header frame after body frame"));
            }
            header.push(frame);
        } else {
            body.push(frame);
        }

        if flags & FLAG_MORE == 0 {
            return Ok(Some(Envelope::with_header(header, body)));
        }
    }
}

/// Encode an envelope into one contiguous buffer.
pub fn encode_envelope(envelope: &Envelope) -> std::io::Result<Bytes> {
    let total = envelope.frame_count();
    if total == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cannot encode an envelope without frames",
        ));
    }

    let size: usize = envelope.frames().map(|f| f.len() + 5).sum();
    let mut buf = BytesMut::with_capacity(size);
    let header_len = envelope.header_len();
    for (index, frame) in envelope.frames().enumerate() {
        let mut flags = 0;
        if index < header_len {
            flags |= FLAG_HEADER;
        }
        if index + 1 < total {
            flags |= FLAG_MORE;
        }
        buf.put_u32(frame_len(frame)?);
        buf.put_u8(flags);
        buf.put_slice(frame);
    }
    Ok(buf.freeze())
}

/// Write one envelope and flush.
pub async fn write_envelope<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> std::io::Result<()> {
    let encoded = encode_envelope(envelope)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
