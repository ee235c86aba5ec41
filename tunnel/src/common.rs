use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use ctr::cipher::{KeyIvInit, StreamCipher};
use derivative::Derivative;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::InvalidPskLength;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Permitted pre-shared key lengths in bytes.
pub const PSK_LENGTHS: [usize; 3] = [16, 32, 64];

pub(crate) const PUBLIC_KEY_LENGTH: usize = 32;
pub(crate) const CONFIRM_LENGTH: usize = 32;

/// Ciphertext is staged in chunks of this size on the write path.
const WRITE_CHUNK: usize = 32 * 1024;

/// Pre-shared key, identical on both peers.
///
/// The length (16, 32 or 64 bytes) selects the AES key size for the tunnel;
/// the bytes feed the confirmation hash and the padding mask. `Debug` never
/// prints the key material.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Psk(#[derivative(Debug = "ignore")] Vec<u8>);

impl Psk {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, InvalidPskLength> {
        let key = key.as_ref();
        if !PSK_LENGTHS.contains(&key.len()) {
            return Err(InvalidPskLength(key.len()));
        }
        Ok(Psk(key.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// XOR of all key bytes; masks the padding length bytes on the wire.
    pub(crate) fn fold(&self) -> u8 {
        self.0.iter().fold(0, |acc, &b| acc ^ b)
    }
}

/// `SHA-256(PSK ‖ shared_secret)`, sent by the server and checked by the
/// client. Binds the ephemeral exchange to PSK knowledge.
pub(crate) fn confirm_hash(psk: &Psk, secret: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(psk.as_bytes());
    hasher.update(secret);
    hasher.finalize().into()
}

/// Key material split out of the Diffie-Hellman shared secret.
///
/// The AES key takes the leading bytes of the secret (16 of them for a
/// 16-byte PSK, 32 otherwise); the two CTR IVs are the secret's halves.
/// The client reads with `iv_a` and writes with `iv_b`, the server the
/// mirror image, so each direction has one keystream shared by both peers
/// and disjoint from the other direction's.
pub(crate) struct SessionKeys {
    secret: [u8; 32],
    key_len: usize,
}

impl SessionKeys {
    pub(crate) fn derive(psk: &Psk, secret: &[u8; 32]) -> Self {
        let key_len = if psk.as_bytes().len() == 16 { 16 } else { 32 };
        SessionKeys {
            secret: *secret,
            key_len,
        }
    }

    fn keystream(&self, iv: &[u8]) -> Keystream {
        match self.key_len {
            16 => Keystream::Aes128(
                Aes128Ctr::new_from_slices(&self.secret[..16], iv)
                    .expect("key and iv lengths are fixed"),
            ),
            _ => Keystream::Aes256(
                Aes256Ctr::new_from_slices(&self.secret[..32], iv)
                    .expect("key and iv lengths are fixed"),
            ),
        }
    }

    fn iv_a(&self) -> &[u8] {
        &self.secret[..16]
    }

    fn iv_b(&self) -> &[u8] {
        &self.secret[16..]
    }

    /// `(read, write)` keystreams for the client side.
    pub(crate) fn client_keystreams(&self) -> (Keystream, Keystream) {
        (self.keystream(self.iv_a()), self.keystream(self.iv_b()))
    }

    /// `(read, write)` keystreams for the server side, IVs swapped.
    pub(crate) fn server_keystreams(&self) -> (Keystream, Keystream) {
        (self.keystream(self.iv_b()), self.keystream(self.iv_a()))
    }
}

/// One direction's CTR keystream position. Advances by exactly the number
/// of application bytes transferred, never more.
pub(crate) enum Keystream {
    Aes128(Aes128Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(cipher) => cipher.apply_keystream(buf),
            Keystream::Aes256(cipher) => cipher.apply_keystream(buf),
        }
    }
}

/// An established tunnel session over `S`.
///
/// Reads XOR the inbound bytes with the read-direction keystream in place;
/// writes encrypt into a staging buffer that is flushed to the socket before
/// the call reports completion, keeping both peers' keystream positions in
/// lockstep with the bytes actually exchanged.
pub struct TunnelStream<S> {
    socket: S,
    read_keystream: Keystream,
    write_keystream: Keystream,
    write_buf: Vec<u8>,
    write_pos: usize,
    write_consumed: usize,
}

impl<S> TunnelStream<S> {
    pub(crate) fn new(socket: S, read_keystream: Keystream, write_keystream: Keystream) -> Self {
        TunnelStream {
            socket,
            read_keystream,
            write_keystream,
            write_buf: Vec::new(),
            write_pos: 0,
            write_consumed: 0,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    /// Discard the cipher state and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.socket
    }
}

impl<S> AsyncRead for TunnelStream<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled = buf.filled().len();
        ready!(Pin::new(&mut this.socket).poll_read(cx, buf))?;
        this.read_keystream.apply(&mut buf.filled_mut()[filled..]);
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncWrite for TunnelStream<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.write_buf.is_empty() {
            let take = buf.len().min(WRITE_CHUNK);
            this.write_buf.extend_from_slice(&buf[..take]);
            this.write_keystream.apply(&mut this.write_buf);
            this.write_pos = 0;
            this.write_consumed = take;
        }
        while this.write_pos < this.write_buf.len() {
            let n = ready!(
                Pin::new(&mut this.socket).poll_write(cx, &this.write_buf[this.write_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.write_pos += n;
        }
        this.write_buf.clear();
        this.write_pos = 0;
        Poll::Ready(Ok(this.write_consumed))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psk16() -> Psk {
        Psk::new(b"example key 1234").unwrap()
    }

    #[test]
    fn rejects_bad_psk_lengths() {
        for len in [0usize, 1, 15, 17, 33, 63, 65, 128] {
            assert!(Psk::new(vec![0u8; len]).is_err(), "length {len} accepted");
        }
        for len in PSK_LENGTHS {
            assert!(Psk::new(vec![0u8; len]).is_ok());
        }
    }

    #[test]
    fn fold_is_xor_of_all_bytes() {
        let psk = Psk::new([0x01u8, 0x02, 0x04, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x80])
            .unwrap();
        assert_eq!(psk.fold(), 0x01 ^ 0x02 ^ 0x04 ^ 0x08 ^ 0x80);
    }

    #[test]
    fn debug_hides_key_material() {
        let rendered = format!("{:?}", psk16());
        assert!(!rendered.contains("example"));
    }

    #[test]
    fn key_size_follows_psk_length() {
        let secret = [0x42u8; 32];
        let keys = SessionKeys::derive(&psk16(), &secret);
        assert!(matches!(keys.keystream(keys.iv_a()), Keystream::Aes128(_)));

        for len in [32usize, 64] {
            let keys = SessionKeys::derive(&Psk::new(vec![7u8; len]).unwrap(), &secret);
            assert!(matches!(keys.keystream(keys.iv_a()), Keystream::Aes256(_)));
        }
    }

    // The client's write keystream must be the server's read keystream and
    // vice versa, regardless of how the data is chunked.
    #[test]
    fn directions_pair_up_across_peers() {
        let secret: [u8; 32] = core::array::from_fn(|i| i as u8);
        let keys = SessionKeys::derive(&psk16(), &secret);

        let (mut client_read, mut client_write) = keys.client_keystreams();
        let (mut server_read, mut server_write) = keys.server_keystreams();

        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let mut wire = plaintext.to_vec();
        client_write.apply(&mut wire);
        assert_ne!(&wire[..], &plaintext[..]);
        for chunk in wire.chunks_mut(5) {
            server_read.apply(chunk);
        }
        assert_eq!(&wire[..], &plaintext[..]);

        let mut wire = plaintext.to_vec();
        server_write.apply(&mut wire);
        client_read.apply(&mut wire);
        assert_eq!(&wire[..], &plaintext[..]);
    }

    #[test]
    fn directions_use_disjoint_keystreams() {
        let secret: [u8; 32] = core::array::from_fn(|i| i as u8);
        let keys = SessionKeys::derive(&psk16(), &secret);
        let (_, mut client_write) = keys.client_keystreams();
        let (_, mut server_write) = keys.server_keystreams();

        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        client_write.apply(&mut a);
        server_write.apply(&mut b);
        assert_ne!(a, b);
    }
}
