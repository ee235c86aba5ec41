use std::io;

use thiserror::Error;

/// Error establishing a tunnel session.
///
/// `ShortRead` and `AuthFailed` both mean the peer is not a usable tunnel
/// endpoint for our key; the underlying socket is of no further use and is
/// dropped by the caller.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer closed or truncated a handshake frame.
    #[error("peer closed or truncated a handshake frame")]
    ShortRead,
    /// The confirmation hash did not match; the peer holds a different key.
    #[error("confirmation hash mismatch, wrong pre-shared key?")]
    AuthFailed,
    #[error("handshake i/o: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for HandshakeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            HandshakeError::ShortRead
        } else {
            HandshakeError::Io(err)
        }
    }
}

impl From<HandshakeError> for io::Error {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Io(e) => e,
            HandshakeError::ShortRead => {
                io::Error::new(io::ErrorKind::UnexpectedEof, HandshakeError::ShortRead)
            }
            HandshakeError::AuthFailed => {
                io::Error::new(io::ErrorKind::PermissionDenied, HandshakeError::AuthFailed)
            }
        }
    }
}

/// A pre-shared key must be exactly 16, 32 or 64 bytes.
#[derive(Debug, Error)]
#[error("pre-shared key must be 16, 32 or 64 bytes, got {0}")]
pub struct InvalidPskLength(pub usize);
