//! PSK-authenticated tunnel transport.
//!
//! A [`Client`] and a [`Server`] sharing a pre-shared key ([`Psk`]) perform an
//! ephemeral Curve25519 key exchange over any reliable byte stream. The
//! exchanged public keys are wrapped in randomised padding frames so the
//! handshake has no fixed lengths or offsets on the wire, and the server
//! proves PSK knowledge with a confirmation hash over the shared secret.
//! A successful handshake yields a [`TunnelStream`] whose reads and writes
//! are AES-CTR encrypted with a distinct keystream per direction.
//!
//! The transport does not provide forward secrecy beyond a single connection
//! and carries no per-record MAC; it is a point-to-point tunnel between two
//! peers that already share a key, not a TLS replacement.

pub mod ecdh;

mod client;
mod common;
mod error;
mod obfs;
mod server;

pub use client::Client;
pub use common::{Psk, TunnelStream, PSK_LENGTHS};
pub use error::{HandshakeError, InvalidPskLength};
pub use server::Server;
