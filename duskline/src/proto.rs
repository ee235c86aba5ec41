//! Inner proxy protocol carried over an established tunnel.
//!
//! One request frame per tunnel selects TCP or UDP proxying; the server
//! answers with a single status byte that is relayed verbatim into the
//! SOCKS5 reply. An open UDP session then exchanges length-prefixed
//! datagram frames in both directions.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const CMD_TCP: u8 = 0;
pub const CMD_UDP: u8 = 1;

pub const REP_SUCCESS: u8 = 0;
pub const REP_FAILURE: u8 = 1;
pub const REP_NETWORK_UNREACHABLE: u8 = 3;
pub const REP_HOST_UNREACHABLE: u8 = 4;
pub const REP_CONNECTION_REFUSED: u8 = 5;

/// Proxy intent sent by the client right after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Tcp { host: String, port: u16 },
    Udp,
}

/// One datagram crossing the tunnel. Outbound the address is the target,
/// inbound it is the source of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub host: String,
    pub port: u16,
    pub data: Vec<u8>,
}

pub async fn write_request<W>(stream: &mut W, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match request {
        Request::Tcp { host, port } => {
            let host = host.as_bytes();
            if host.is_empty() || host.len() > 255 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "target host must be 1..=255 bytes",
                ));
            }
            let mut frame = Vec::with_capacity(4 + host.len());
            frame.push(CMD_TCP);
            frame.push(host.len() as u8);
            frame.extend_from_slice(host);
            frame.extend_from_slice(&port.to_be_bytes());
            stream.write_all(&frame).await
        }
        // A UDP request carries no target; every datagram names its own.
        Request::Udp => stream.write_all(&[CMD_UDP]).await,
    }
}

pub async fn read_request<R>(stream: &mut R) -> io::Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut cmd = [0u8; 1];
    stream.read_exact(&mut cmd).await?;
    match cmd[0] {
        CMD_TCP => {
            let (host, port) = read_host_port(stream).await?;
            Ok(Request::Tcp { host, port })
        }
        CMD_UDP => Ok(Request::Udp),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown tunnel command {other}"),
        )),
    }
}

pub async fn write_response<W>(stream: &mut W, code: u8) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&[code]).await
}

pub async fn read_response<R>(stream: &mut R) -> io::Result<u8>
where
    R: AsyncRead + Unpin,
{
    let mut code = [0u8; 1];
    stream.read_exact(&mut code).await?;
    Ok(code[0])
}

/// Map a dial failure onto the response byte, which doubles as the SOCKS5
/// reply code on the client.
pub fn dial_error_code(err: &io::Error) -> u8 {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => REP_CONNECTION_REFUSED,
        io::ErrorKind::HostUnreachable => REP_HOST_UNREACHABLE,
        io::ErrorKind::NetworkUnreachable => REP_NETWORK_UNREACHABLE,
        _ => REP_FAILURE,
    }
}

pub async fn write_datagram<W>(
    stream: &mut W,
    host: &str,
    port: u16,
    data: &[u8],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let host = host.as_bytes();
    if host.is_empty() || host.len() > 255 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "datagram host must be 1..=255 bytes",
        ));
    }
    debug_assert!(data.len() <= u16::MAX as usize);
    let mut frame = Vec::with_capacity(5 + host.len() + data.len());
    frame.push(host.len() as u8);
    frame.extend_from_slice(host);
    frame.extend_from_slice(&port.to_be_bytes());
    frame.extend_from_slice(&(data.len() as u16).to_be_bytes());
    frame.extend_from_slice(data);
    stream.write_all(&frame).await
}

pub async fn read_datagram<R>(stream: &mut R) -> io::Result<Datagram>
where
    R: AsyncRead + Unpin,
{
    let (host, port) = read_host_port(stream).await?;
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await?;
    let mut data = vec![0u8; u16::from_be_bytes(len) as usize];
    stream.read_exact(&mut data).await?;
    Ok(Datagram { host, port, data })
}

async fn read_host_port<R>(stream: &mut R) -> io::Result<(String, u16)>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    if len[0] == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "empty host in tunnel frame",
        ));
    }
    let mut host = vec![0u8; len[0] as usize];
    stream.read_exact(&mut host).await?;
    let host = String::from_utf8(host)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "host is not valid utf-8"))?;
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok((host, u16::from_be_bytes(port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip_request(request: Request) -> Request {
        let mut wire = Vec::new();
        write_request(&mut wire, &request).await.unwrap();
        read_request(&mut &wire[..]).await.unwrap()
    }

    #[tokio::test]
    async fn tcp_request_round_trips() {
        let request = Request::Tcp {
            host: "example.org".into(),
            port: 4242,
        };
        assert_eq!(round_trip_request(request.clone()).await, request);
    }

    #[tokio::test]
    async fn udp_request_is_a_single_byte() {
        let mut wire = Vec::new();
        write_request(&mut wire, &Request::Udp).await.unwrap();
        assert_eq!(wire, [CMD_UDP]);
        assert_eq!(read_request(&mut &wire[..]).await.unwrap(), Request::Udp);
    }

    #[tokio::test]
    async fn oversized_host_is_rejected() {
        let request = Request::Tcp {
            host: "x".repeat(256),
            port: 80,
        };
        let mut wire = Vec::new();
        let err = write_request(&mut wire, &request).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let wire = [9u8];
        let err = read_request(&mut &wire[..]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_request_is_an_error() {
        let wire = [CMD_TCP, 5, b'a', b'b'];
        let err = read_request(&mut &wire[..]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn datagram_round_trips() {
        let mut wire = Vec::new();
        write_datagram(&mut wire, "10.0.0.1", 53, b"query")
            .await
            .unwrap();
        let datagram = read_datagram(&mut &wire[..]).await.unwrap();
        assert_eq!(datagram.host, "10.0.0.1");
        assert_eq!(datagram.port, 53);
        assert_eq!(datagram.data, b"query");
    }

    #[test]
    fn dial_errors_map_to_socks_codes() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, REP_CONNECTION_REFUSED),
            (io::ErrorKind::HostUnreachable, REP_HOST_UNREACHABLE),
            (io::ErrorKind::NetworkUnreachable, REP_NETWORK_UNREACHABLE),
            (io::ErrorKind::TimedOut, REP_FAILURE),
        ];
        for (kind, code) in cases {
            assert_eq!(dial_error_code(&io::Error::from(kind)), code);
        }
    }
}
