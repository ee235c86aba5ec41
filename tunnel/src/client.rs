use rand::thread_rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use x25519_dalek::PublicKey;

use crate::common::{
    confirm_hash, Psk, SessionKeys, TunnelStream, CONFIRM_LENGTH, PUBLIC_KEY_LENGTH,
};
use crate::ecdh;
use crate::error::HandshakeError;
use crate::obfs::{push_padding, read_padding, MAX_PADDING};

/// Client side of the tunnel; holds the pre-shared key used to establish
/// sessions with peer servers.
#[derive(Clone, Debug)]
pub struct Client {
    pub psk: Psk,
}

impl Client {
    pub fn new(psk: Psk) -> Self {
        Client { psk }
    }

    /// Handshake with a peer server on the other end of `stream`.
    ///
    /// Sends the ephemeral public key between two padding frames, then
    /// expects the server's padded `public key ‖ confirmation hash` reply.
    /// A confirmation mismatch aborts with [`HandshakeError::AuthFailed`]
    /// before any application data touches the wire.
    pub async fn connect<S>(&self, mut stream: S) -> Result<TunnelStream<S>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (secret, public) = ecdh::generate_keypair();
        let mask = self.psk.fold();

        let mut hello = Vec::with_capacity(2 * MAX_PADDING + PUBLIC_KEY_LENGTH);
        push_padding(&mut hello, mask, &mut thread_rng());
        hello.extend_from_slice(public.as_bytes());
        push_padding(&mut hello, mask, &mut thread_rng());
        stream.write_all(&hello).await?;
        trace!(len = hello.len(), "sent padded key exchange");

        read_padding(&mut stream, mask).await?;
        let mut reply = [0u8; PUBLIC_KEY_LENGTH + CONFIRM_LENGTH];
        stream.read_exact(&mut reply).await?;
        read_padding(&mut stream, mask).await?;

        let server_public =
            PublicKey::from(<[u8; 32]>::try_from(&reply[..PUBLIC_KEY_LENGTH]).unwrap());
        let shared = ecdh::shared_secret(secret, &server_public);
        if confirm_hash(&self.psk, &shared)[..] != reply[PUBLIC_KEY_LENGTH..] {
            debug!("server failed key confirmation");
            return Err(HandshakeError::AuthFailed);
        }

        let keys = SessionKeys::derive(&self.psk, &shared);
        let (read_keystream, write_keystream) = keys.client_keystreams();
        trace!("tunnel established");
        Ok(TunnelStream::new(stream, read_keystream, write_keystream))
    }
}
