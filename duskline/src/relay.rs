//! Bidirectional TCP relay.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const STAGING_BUFFER: usize = 32 * 1024;

/// Copy in both directions until either side closes or fails, then drop
/// both endpoints. The surviving direction observes the close on its next
/// I/O; close-propagation is the only cancellation mechanism in a session.
pub async fn relay<A, B>(a: A, b: B) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    tokio::select! {
        done = pipe(&mut a_read, &mut b_write) => done,
        done = pipe(&mut b_read, &mut a_write) => done,
    }
}

async fn pipe<R, W>(reader: &mut R, writer: &mut W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; STAGING_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}
