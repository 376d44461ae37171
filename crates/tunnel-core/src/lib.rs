//! Inner tunnel protocol core: frame codec, HKDF key schedule,
//! encrypt-then-MAC envelope, handshake, auth exchange, and the
//! per-connection session state machine.
//!
//! The TLS transport, listener, CLI, and credential persistence are
//! external collaborators this crate only consumes (generic
//! `AsyncRead + AsyncWrite` for the transport, the `CredentialVerifier`
//! trait for auth) — see `tunnel-cli` and `tunnel-creds`.

pub mod auth;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod session;

pub use auth::CredentialVerifier;
pub use error::TunnelError;
pub use session::{accept_session, connect_session, EstablishedSession, Phase};
