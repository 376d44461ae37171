//! HELLO / HELLO_ACK handshake: establishes session identifiers,
//! exchanges nonces and a server-chosen key seed, and derives the
//! session's symmetric keys. Both messages are cleartext on the wire
//! (the envelope only wraps application and auth payloads).

use crate::error::TunnelError;
use crate::frame::{read_frame, write_frame, FrameType};
use crate::keys::{derive_session_keys, DerivedKeys};
use rand::RngCore;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Recommended deadline for the HELLO/HELLO_ACK exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output of a completed handshake, from either role's perspective.
pub struct HandshakeOutcome {
    pub peer_session_id: String,
    pub keys: DerivedKeys,
}

fn random_nonce16() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn random_key_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

/// Client-side handshake (spec.md §4.4). `local_session_id` is this
/// client's own session id, generated by the caller.
pub async fn client_handshake<T>(
    transport: &mut T,
    local_session_id: &str,
) -> Result<HandshakeOutcome, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let nonce_client = random_nonce16();

    if local_session_id.len() > 255 {
        return Err(TunnelError::HandshakeFailed("session id too long".into()));
    }
    let mut hello_payload = Vec::with_capacity(1 + local_session_id.len() + 16);
    hello_payload.push(local_session_id.len() as u8);
    hello_payload.extend_from_slice(local_session_id.as_bytes());
    hello_payload.extend_from_slice(&nonce_client);
    write_frame(transport, FrameType::Hello, &hello_payload).await?;

    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(transport)).await??;
    if frame.frame_type != FrameType::HelloAck {
        return Err(TunnelError::HandshakeFailed("expected HELLO_ACK".into()));
    }

    let payload = &frame.payload;
    if payload.is_empty() {
        return Err(TunnelError::HandshakeFailed("HELLO_ACK payload empty".into()));
    }
    let id_len = payload[0] as usize;
    if payload.len() < 1 + id_len + 16 + 32 {
        return Err(TunnelError::HandshakeFailed(
            "HELLO_ACK payload too short".into(),
        ));
    }

    let peer_session_id = String::from_utf8(payload[1..1 + id_len].to_vec())
        .map_err(|_| TunnelError::HandshakeFailed("non-UTF8 session id".into()))?;
    let mut nonce_server = [0u8; 16];
    nonce_server.copy_from_slice(&payload[1 + id_len..1 + id_len + 16]);
    let mut key_seed = [0u8; 32];
    key_seed.copy_from_slice(&payload[1 + id_len + 16..1 + id_len + 16 + 32]);

    let keys = derive_session_keys(&key_seed, &nonce_client, &nonce_server);

    Ok(HandshakeOutcome {
        peer_session_id,
        keys,
    })
}

/// Server-side handshake (spec.md §4.4). `local_session_id` is this
/// server's own session id.
pub async fn server_handshake<T>(
    transport: &mut T,
    local_session_id: &str,
) -> Result<HandshakeOutcome, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(transport)).await??;
    if frame.frame_type != FrameType::Hello {
        return Err(TunnelError::HandshakeFailed("expected HELLO".into()));
    }

    let payload = &frame.payload;
    if payload.is_empty() {
        return Err(TunnelError::HandshakeFailed("HELLO payload empty".into()));
    }
    let id_len = payload[0] as usize;
    if payload.len() < 1 + id_len + 16 {
        return Err(TunnelError::HandshakeFailed("HELLO payload too short".into()));
    }

    let peer_session_id = String::from_utf8(payload[1..1 + id_len].to_vec())
        .map_err(|_| TunnelError::HandshakeFailed("non-UTF8 session id".into()))?;
    let mut nonce_client = [0u8; 16];
    nonce_client.copy_from_slice(&payload[1 + id_len..1 + id_len + 16]);

    let nonce_server = random_nonce16();
    let key_seed = random_key_seed();

    if local_session_id.len() > 255 {
        return Err(TunnelError::HandshakeFailed("session id too long".into()));
    }
    let mut ack_payload = Vec::with_capacity(1 + local_session_id.len() + 16 + 32);
    ack_payload.push(local_session_id.len() as u8);
    ack_payload.extend_from_slice(local_session_id.as_bytes());
    ack_payload.extend_from_slice(&nonce_server);
    ack_payload.extend_from_slice(&key_seed);
    write_frame(transport, FrameType::HelloAck, &ack_payload).await?;

    let keys = derive_session_keys(&key_seed, &nonce_client, &nonce_server);

    Ok(HandshakeOutcome {
        peer_session_id,
        keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_and_server_derive_identical_keys() {
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);

        let server_task =
            tokio::spawn(async move { server_handshake(&mut server_io, "s-1").await.unwrap() });
        let client_outcome = client_handshake(&mut client_io, "c-1").await.unwrap();
        let server_outcome = server_task.await.unwrap();

        assert_eq!(client_outcome.peer_session_id, "s-1");
        assert_eq!(server_outcome.peer_session_id, "c-1");
        assert_eq!(client_outcome.keys.enc_key, server_outcome.keys.enc_key);
        assert_eq!(client_outcome.keys.mac_key, server_outcome.keys.mac_key);
    }

    #[tokio::test]
    async fn wrong_frame_type_fails_handshake() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_frame(&mut a, FrameType::Data, b"not a hello").await.unwrap();
        let err = server_handshake(&mut b, "s-1").await.unwrap_err();
        assert!(matches!(err, TunnelError::HandshakeFailed(_)));
    }
}
