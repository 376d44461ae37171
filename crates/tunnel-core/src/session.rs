//! Session state machine (C6): orders handshake -> auth -> data,
//! dispatches frames by type in the `Established` phase, and applies
//! the heartbeat / decrypt-failure / close policy from spec.md §4.6.

use crate::auth::{client_auth, server_auth, CredentialVerifier, ServerAuthOutcome};
use crate::envelope;
use crate::error::TunnelError;
use crate::frame::{read_frame, write_frame, FrameType};
use crate::handshake::{client_handshake, server_handshake};
use crate::keys::DerivedKeys;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// A side that has received nothing for this long MAY close for
/// liveness failure.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive `ENCRYPTED_DATA` decrypt failures tolerated before the
/// session closes; an isolated bad frame does not kill the session.
pub const N_MAX_DECRYPT_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHello,
    AwaitingAck,
    AwaitingAuth,
    Established,
    Closed,
}

/// A session whose handshake and authentication have both completed.
/// `phase` is always `Established` while this struct is alive; it
/// transitions to `Closed` only inside `recv`/`close`, at which point
/// the struct should be dropped.
pub struct EstablishedSession<T> {
    transport: T,
    keys: DerivedKeys,
    pub session_id_local: String,
    pub session_id_peer: String,
    pub authenticated_user: Option<String>,
    phase: Phase,
    consecutive_decrypt_failures: u32,
}

impl<T> EstablishedSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Encrypts and sends `data` as an `ENCRYPTED_DATA` frame.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TunnelError> {
        if self.phase != Phase::Established {
            return Err(TunnelError::Protocol("session not established".into()));
        }
        let envelope = envelope::encrypt(&self.keys, data);
        write_frame(&mut self.transport, FrameType::EncryptedData, &envelope).await
    }

    /// Waits for the next application payload, transparently replying
    /// to `HEARTBEAT` frames and applying the decrypt-failure policy.
    /// Returns `Err(TunnelError::Closed)` once `CLOSE` is observed.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, TunnelError> {
        if self.phase != Phase::Established {
            return Err(TunnelError::Closed);
        }
        loop {
            let frame = tokio::time::timeout(timeout, read_frame(&mut self.transport)).await??;
            match frame.frame_type {
                FrameType::EncryptedData => match envelope::decrypt(&self.keys, &frame.payload) {
                    Ok(plaintext) => {
                        self.consecutive_decrypt_failures = 0;
                        return Ok(plaintext);
                    }
                    Err(e) => {
                        self.consecutive_decrypt_failures += 1;
                        tracing::warn!(
                            session = %self.session_id_local,
                            failures = self.consecutive_decrypt_failures,
                            "envelope decrypt failed: {e}"
                        );
                        if self.consecutive_decrypt_failures > N_MAX_DECRYPT_FAILURES {
                            self.phase = Phase::Closed;
                            return Err(TunnelError::AuthFailure);
                        }
                        continue;
                    }
                },
                FrameType::Heartbeat => {
                    write_frame(&mut self.transport, FrameType::Heartbeat, b"").await?;
                    continue;
                }
                FrameType::Close => {
                    self.phase = Phase::Closed;
                    return Err(TunnelError::Closed);
                }
                FrameType::Data => {
                    // Legacy unencrypted DATA (spec.md §9 open question 1):
                    // the canonical revision never sends it, but a peer
                    // that does is a protocol violation, not silently
                    // accepted as plaintext application data.
                    return Err(TunnelError::Protocol("unexpected legacy DATA frame".into()));
                }
                other => {
                    return Err(TunnelError::Protocol(format!(
                        "unexpected frame type in Established: {other:?}"
                    )))
                }
            }
        }
    }

    /// Sends `CLOSE` and marks the session closed. Best-effort: write
    /// failures are not surfaced, matching spec.md §5's cancellation
    /// policy (best-effort CLOSE, release transport).
    pub async fn close(&mut self) {
        let _ = write_frame(&mut self.transport, FrameType::Close, b"").await;
        self.phase = Phase::Closed;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// Drives the server side of a freshly accepted transport through
/// handshake and auth, returning an `Established` session on success.
/// On auth rejection, sends `AUTH_RESULT(false, ..)` then `CLOSE` and
/// returns `TunnelError::AuthRejected`, per spec.md §4.5.
pub async fn accept_session<T, V>(
    mut transport: T,
    local_session_id: String,
    verifier: &V,
) -> Result<EstablishedSession<T>, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    V: CredentialVerifier,
{
    let outcome = server_handshake(&mut transport, &local_session_id).await?;

    match server_auth(&mut transport, &outcome.keys, verifier).await? {
        ServerAuthOutcome::Authenticated(username) => Ok(EstablishedSession {
            transport,
            keys: outcome.keys,
            session_id_local: local_session_id,
            session_id_peer: outcome.peer_session_id,
            authenticated_user: Some(username),
            phase: Phase::Established,
            consecutive_decrypt_failures: 0,
        }),
        ServerAuthOutcome::Rejected => {
            write_frame(&mut transport, FrameType::Close, b"").await.ok();
            Err(TunnelError::AuthRejected("authentication failed".into()))
        }
    }
}

/// Drives the client side of a freshly connected transport through
/// handshake and auth, returning an `Established` session on success.
pub async fn connect_session<T>(
    mut transport: T,
    local_session_id: String,
    username: &str,
    password: &str,
) -> Result<EstablishedSession<T>, TunnelError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let outcome = client_handshake(&mut transport, &local_session_id).await?;
    client_auth(&mut transport, &outcome.keys, username, password).await?;

    Ok(EstablishedSession {
        transport,
        keys: outcome.keys,
        session_id_local: local_session_id,
        session_id_peer: outcome.peer_session_id,
        authenticated_user: Some(username.to_string()),
        phase: Phase::Established,
        consecutive_decrypt_failures: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticStore;
    impl CredentialVerifier for StaticStore {
        fn verify(&self, username: &str, password: &str) -> bool {
            username == "alice" && password == "hunter2"
        }
    }

    #[tokio::test]
    async fn full_session_round_trip() {
        let (client_io, server_io) = tokio::io::duplex(8192);

        let server_task = tokio::spawn(async move {
            let mut session = accept_session(server_io, "s-1".into(), &StaticStore)
                .await
                .unwrap();
            let msg = session.recv(Duration::from_secs(5)).await.unwrap();
            session.send(&msg).await.unwrap();
            session
        });

        let mut client = connect_session(client_io, "c-1".into(), "alice", "hunter2")
            .await
            .unwrap();
        client.send(b"ping").await.unwrap();
        let echoed = client.recv(Duration::from_secs(5)).await.unwrap();
        assert_eq!(echoed, b"ping");

        server_task.await.unwrap();
    }

    /// Scenario S6: heartbeat is answered transparently and recv still
    /// yields the data frame sent afterward.
    #[tokio::test]
    async fn heartbeat_is_answered_transparently() {
        let (client_io, server_io) = tokio::io::duplex(8192);

        let server_task = tokio::spawn(async move {
            accept_session(server_io, "s-1".into(), &StaticStore).await.unwrap()
        });
        let mut client = connect_session(client_io, "c-1".into(), "alice", "hunter2")
            .await
            .unwrap();
        let mut server = server_task.await.unwrap();

        // drive one heartbeat round-trip manually via the raw frame API,
        // then send the real data frame the heartbeat should not swallow
        write_frame(&mut client_transport(&mut client), FrameType::Heartbeat, b"")
            .await
            .unwrap();
        client.send(b"heartbeat-then-data").await.unwrap();

        let got = server.recv(Duration::from_secs(5)).await.unwrap();
        assert_eq!(got, b"heartbeat-then-data");
    }

    // Test-only accessor: exposes the underlying transport so the
    // heartbeat test can inject a raw frame without a public API leak.
    fn client_transport<T>(session: &mut EstablishedSession<T>) -> &mut T {
        &mut session.transport
    }
}
