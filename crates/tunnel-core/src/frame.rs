//! Length-prefixed binary frame codec.
//!
//! Wire format: `[ length : u32 BE ] [ type : u8 ] [ payload : length-1 bytes ]`.
//! `length` covers the type byte plus payload; the payload may be empty.

use crate::error::TunnelError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame's total size, to bound memory use.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Hello = 1,
    HelloAck = 2,
    Data = 3,
    Heartbeat = 4,
    Close = 5,
    EncryptedData = 6,
    Auth = 7,
    AuthResult = 8,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Hello),
            2 => Some(Self::HelloAck),
            3 => Some(Self::Data),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::Close),
            6 => Some(Self::EncryptedData),
            7 => Some(Self::Auth),
            8 => Some(Self::AuthResult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

/// Write one frame to `transport`. Returns once all bytes have been
/// flushed, or fails with `TunnelError::Transport`.
pub async fn write_frame<T>(
    transport: &mut T,
    frame_type: FrameType,
    payload: &[u8],
) -> Result<(), TunnelError>
where
    T: AsyncWrite + Unpin + Send,
{
    let total_len = 1 + payload.len();
    if total_len > MAX_FRAME_SIZE {
        return Err(TunnelError::Protocol("frame exceeds MAX_FRAME_SIZE".into()));
    }
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_be_bytes());
    buf.push(frame_type as u8);
    buf.extend_from_slice(payload);

    transport.write_all(&buf).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one frame from `transport`. Rejects `length == 0` and any frame
/// whose declared length exceeds `MAX_FRAME_SIZE` as `TunnelError::Protocol`.
pub async fn read_frame<T>(transport: &mut T) -> Result<Frame, TunnelError>
where
    T: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    transport.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(TunnelError::Protocol("zero-length frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(TunnelError::Protocol("frame exceeds MAX_FRAME_SIZE".into()));
    }

    let mut body = vec![0u8; len];
    transport.read_exact(&mut body).await?;

    let frame_type = FrameType::from_u8(body[0])
        .ok_or_else(|| TunnelError::Protocol(format!("unknown frame type {}", body[0])))?;
    let payload = body[1..].to_vec();

    Ok(Frame { frame_type, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_identity() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, FrameType::Data, b"hello world").await.unwrap();
        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(frame.payload, b"hello world");
    }

    #[tokio::test]
    async fn round_trip_empty_payload() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, FrameType::Heartbeat, b"").await.unwrap();
        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Heartbeat);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn zero_length_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        // Write a raw zero length header directly, bypassing write_frame.
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(MAX_FRAME_SIZE + 4096);
        let oversized = vec![0u8; MAX_FRAME_SIZE + 1];
        let err = write_frame(&mut a, FrameType::Data, &oversized).await.unwrap_err();
        assert!(matches!(err, TunnelError::Protocol(_)));
        drop(b);
    }

    #[tokio::test]
    async fn unknown_frame_type_is_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_all(&2u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xFFu8, 0x00u8]).await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }
}
