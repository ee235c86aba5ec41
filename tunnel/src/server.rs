use rand::thread_rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use x25519_dalek::PublicKey;

use crate::common::{
    confirm_hash, Psk, SessionKeys, TunnelStream, CONFIRM_LENGTH, PUBLIC_KEY_LENGTH,
};
use crate::ecdh;
use crate::error::HandshakeError;
use crate::obfs::{push_padding, read_padding, MAX_PADDING};

/// Server side of the tunnel; accepts sessions from peer clients holding the
/// same pre-shared key.
#[derive(Clone, Debug)]
pub struct Server {
    pub psk: Psk,
}

impl Server {
    pub fn new(psk: Psk) -> Self {
        Server { psk }
    }

    /// Accept an incoming byte stream as a tunnel session.
    ///
    /// Reads the client's padded public key, then answers with its own key
    /// and the confirmation hash over `PSK ‖ shared secret`, padded the same
    /// way. The returned stream uses the per-direction IVs swapped relative
    /// to the client, so each direction shares a single keystream.
    pub async fn accept<S>(&self, mut stream: S) -> Result<TunnelStream<S>, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mask = self.psk.fold();

        read_padding(&mut stream, mask).await?;
        let mut client_public = [0u8; PUBLIC_KEY_LENGTH];
        stream.read_exact(&mut client_public).await?;
        read_padding(&mut stream, mask).await?;
        trace!("received padded key exchange");

        let (secret, public) = ecdh::generate_keypair();
        let shared = ecdh::shared_secret(secret, &PublicKey::from(client_public));
        let confirm = confirm_hash(&self.psk, &shared);

        let mut reply =
            Vec::with_capacity(2 * MAX_PADDING + PUBLIC_KEY_LENGTH + CONFIRM_LENGTH);
        push_padding(&mut reply, mask, &mut thread_rng());
        reply.extend_from_slice(public.as_bytes());
        reply.extend_from_slice(&confirm);
        push_padding(&mut reply, mask, &mut thread_rng());
        stream.write_all(&reply).await?;

        let keys = SessionKeys::derive(&self.psk, &shared);
        let (read_keystream, write_keystream) = keys.server_keystreams();
        trace!("tunnel established");
        Ok(TunnelStream::new(stream, read_keystream, write_keystream))
    }
}
