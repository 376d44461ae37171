//! AUTH / AUTH_RESULT exchange (spec.md §4.5). AUTH carries an
//! encrypted JSON `{username, password}` payload; AUTH_RESULT is sent
//! in cleartext, since it carries no secret and the tunnel already
//! runs inside TLS.

use crate::envelope;
use crate::error::TunnelError;
use crate::frame::{read_frame, write_frame, FrameType};
use crate::keys::DerivedKeys;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Recommended deadline for the AUTH/AUTH_RESULT exchange.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize)]
struct AuthPayload {
    username: String,
    password: String,
}

/// Verifier contract consumed by the server-side auth exchange (C7).
/// Implementations (e.g. `tunnel-creds`) decide pass/fail; the core
/// never inspects credential storage itself.
pub trait CredentialVerifier {
    fn verify(&self, username: &str, password: &str) -> bool;
}

fn encode_auth_result(ok: bool, msg: &str) -> Vec<u8> {
    let msg_bytes = msg.as_bytes();
    let mut payload = Vec::with_capacity(1 + 2 + msg_bytes.len());
    payload.push(if ok { 1 } else { 0 });
    payload.extend_from_slice(&(msg_bytes.len() as u16).to_be_bytes());
    payload.extend_from_slice(msg_bytes);
    payload
}

fn decode_auth_result(payload: &[u8]) -> Result<(bool, String), TunnelError> {
    if payload.len() < 3 {
        return Err(TunnelError::Protocol("AUTH_RESULT payload too short".into()));
    }
    let ok = payload[0] != 0;
    let msg_len = u16::from_be_bytes([payload[1], payload[2]]) as usize;
    if payload.len() < 3 + msg_len {
        return Err(TunnelError::Protocol("AUTH_RESULT payload too short".into()));
    }
    let msg = String::from_utf8(payload[3..3 + msg_len].to_vec())
        .map_err(|_| TunnelError::Protocol("non-UTF8 AUTH_RESULT message".into()))?;
    Ok((ok, msg))
}

/// Client side: send AUTH, await AUTH_RESULT. Returns `Ok(())` on
/// success, `Err(TunnelError::AuthRejected)` on a well-formed rejection.
pub async fn client_auth<T>(
    transport: &mut T,
    keys: &DerivedKeys,
    username: &str,
    password: &str,
) -> Result<(), TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let plain = serde_json::to_vec(&AuthPayload {
        username: username.to_string(),
        password: password.to_string(),
    })
    .expect("AuthPayload always serializes");
    let envelope = envelope::encrypt(keys, &plain);
    write_frame(transport, FrameType::Auth, &envelope).await?;

    let frame = tokio::time::timeout(AUTH_TIMEOUT, read_frame(transport)).await??;
    if frame.frame_type != FrameType::AuthResult {
        return Err(TunnelError::Protocol("expected AUTH_RESULT".into()));
    }
    let (ok, msg) = decode_auth_result(&frame.payload)?;
    if !ok {
        return Err(TunnelError::AuthRejected(msg));
    }
    Ok(())
}

/// Outcome of the server-side auth step: either the username that
/// authenticated, or the error reply already sent to the client (the
/// caller still needs to send CLOSE and terminate the session).
pub enum ServerAuthOutcome {
    Authenticated(String),
    Rejected,
}

/// Server side: read AUTH, decrypt, verify, reply with AUTH_RESULT.
/// Does not send CLOSE; the session state machine does that on
/// rejection, per spec.md §4.5.
pub async fn server_auth<T, V>(
    transport: &mut T,
    keys: &DerivedKeys,
    verifier: &V,
) -> Result<ServerAuthOutcome, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    V: CredentialVerifier,
{
    let frame = match tokio::time::timeout(AUTH_TIMEOUT, read_frame(transport)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            send_result(transport, false, "protocol").await?;
            return Ok(ServerAuthOutcome::Rejected);
        }
    };

    if frame.frame_type != FrameType::Auth {
        send_result(transport, false, "protocol").await?;
        return Ok(ServerAuthOutcome::Rejected);
    }

    let plain = match envelope::decrypt(keys, &frame.payload) {
        Ok(plain) => plain,
        Err(_) => {
            send_result(transport, false, "invalid auth payload").await?;
            return Ok(ServerAuthOutcome::Rejected);
        }
    };

    let parsed: AuthPayload = match serde_json::from_slice(&plain) {
        Ok(parsed) => parsed,
        Err(_) => {
            send_result(transport, false, "invalid auth payload").await?;
            return Ok(ServerAuthOutcome::Rejected);
        }
    };

    if !verifier.verify(&parsed.username, &parsed.password) {
        send_result(transport, false, "authentication failed").await?;
        return Ok(ServerAuthOutcome::Rejected);
    }

    send_result(transport, true, "OK").await?;
    Ok(ServerAuthOutcome::Authenticated(parsed.username))
}

async fn send_result<T>(transport: &mut T, ok: bool, msg: &str) -> Result<(), TunnelError>
where
    T: AsyncWrite + Unpin + Send,
{
    write_frame(transport, FrameType::AuthResult, &encode_auth_result(ok, msg)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_session_keys;

    struct StaticStore;
    impl CredentialVerifier for StaticStore {
        fn verify(&self, username: &str, password: &str) -> bool {
            username == "alice" && password == "hunter2"
        }
    }

    fn s1_keys() -> DerivedKeys {
        derive_session_keys(&[0x42u8; 32], &[0x11u8; 16], &[0x22u8; 16])
    }

    /// Scenario S4: auth success.
    #[tokio::test]
    async fn s4_auth_success() {
        let keys = s1_keys();
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);
        let server_keys = keys.clone();
        let server_task = tokio::spawn(async move {
            server_auth(&mut server_io, &server_keys, &StaticStore).await.unwrap()
        });

        client_auth(&mut client_io, &keys, "alice", "hunter2").await.unwrap();
        let outcome = server_task.await.unwrap();
        assert!(matches!(outcome, ServerAuthOutcome::Authenticated(u) if u == "alice"));
    }

    /// Scenario S5: auth failure yields AuthRejected to the client.
    #[tokio::test]
    async fn s5_auth_failure() {
        let keys = s1_keys();
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);
        let server_keys = keys.clone();
        let server_task = tokio::spawn(async move {
            server_auth(&mut server_io, &server_keys, &StaticStore).await.unwrap()
        });

        let err = client_auth(&mut client_io, &keys, "alice", "wrong").await.unwrap_err();
        assert!(matches!(err, TunnelError::AuthRejected(ref m) if m == "authentication failed"));
        let outcome = server_task.await.unwrap();
        assert!(matches!(outcome, ServerAuthOutcome::Rejected));
    }
}
