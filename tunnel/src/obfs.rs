//! Randomised padding frames around handshake payloads.
//!
//! A frame is one length byte XOR-masked with the folded PSK, followed by
//! that many bytes of uniform random filler. Both peers insert one frame
//! before and one after each public-key payload, so neither the total
//! handshake length nor the key offsets are constant on the wire.

use std::io;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Padding lengths are drawn uniformly from `[0, MAX_PADDING)`.
pub(crate) const MAX_PADDING: usize = 32;

/// Append one padding frame to an outgoing handshake message.
pub(crate) fn push_padding(buf: &mut Vec<u8>, mask: u8, rng: &mut impl Rng) {
    let len = rng.gen_range(0..MAX_PADDING);
    buf.push(len as u8 ^ mask);
    let start = buf.len();
    buf.resize(start + len, 0);
    rng.fill(&mut buf[start..]);
}

/// Read and discard one padding frame. Any short read is a hard error and
/// aborts the handshake. A masked byte decoding outside `[0, MAX_PADDING)`
/// means the peer masks with a different key; rejecting it up front keeps a
/// mismatched handshake from waiting on filler bytes that will never come.
pub(crate) async fn read_padding<R>(stream: &mut R, mask: u8) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let len = (len[0] ^ mask) as usize;
    if len >= MAX_PADDING {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad padding length",
        ));
    }
    let mut filler = [0u8; MAX_PADDING];
    stream.read_exact(&mut filler[..len]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[tokio::test]
    async fn round_trips_every_length() {
        let mask = 0x5a;
        let mut rng = StdRng::seed_from_u64(7);
        for len in 0..MAX_PADDING {
            let mut frame = vec![len as u8 ^ mask];
            frame.resize(1 + len, 0);
            rng.fill(&mut frame[1..]);

            let mut cursor = &frame[..];
            read_padding(&mut cursor, mask).await.unwrap();
            assert!(cursor.is_empty(), "len {len} left residue");
        }
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mask = 0xff;
        let frame = [31u8 ^ mask, 1, 2, 3];
        let mut cursor = &frame[..];
        let err = read_padding(&mut cursor, mask).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn out_of_range_length_is_rejected() {
        let mask = 0x00;
        let frame = [32u8, 0, 0];
        let mut cursor = &frame[..];
        let err = read_padding(&mut cursor, mask).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    // The masked length byte should be uniform over its 32-value support.
    // Chi-square with 31 degrees of freedom; 52.19 is the p = 0.01 cutoff.
    #[test]
    fn masked_length_byte_is_uniform() {
        let mask = 0xa7;
        let mut rng = StdRng::seed_from_u64(99);
        let mut histogram = [0u32; 256];
        let samples = 10_000usize;
        for _ in 0..samples {
            let mut buf = Vec::new();
            push_padding(&mut buf, mask, &mut rng);
            histogram[buf[0] as usize] += 1;
        }

        let support: Vec<usize> = (0..MAX_PADDING).map(|l| l ^ mask as usize).collect();
        for (byte, &count) in histogram.iter().enumerate() {
            if !support.contains(&byte) {
                assert_eq!(count, 0, "byte {byte:#x} outside the masked support");
            }
        }

        let expected = samples as f64 / MAX_PADDING as f64;
        let chi2: f64 = support
            .iter()
            .map(|&b| {
                let d = histogram[b] as f64 - expected;
                d * d / expected
            })
            .sum();
        assert!(chi2 < 52.19, "chi-square {chi2} rejects uniformity");
    }
}
