//! The SOCKS5 face of the client: method negotiation, request parsing and
//! replies per RFC 1928, plus the UDP relay packet header codec.
//!
//! Only NO AUTHENTICATION is offered. CONNECT and UDP ASSOCIATE are
//! forwarded over the tunnel; BIND is refused.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const VERSION: u8 = 5;
pub const METHOD_NO_AUTH: u8 = 0;

pub const CMD_CONNECT: u8 = 1;
pub const CMD_BIND: u8 = 2;
pub const CMD_UDP_ASSOCIATE: u8 = 3;

pub const ATYP_IPV4: u8 = 1;
pub const ATYP_DOMAIN: u8 = 3;
pub const ATYP_IPV6: u8 = 4;

pub const REP_NOT_ALLOWED: u8 = 2;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 7;

/// Parsed request phase: the command plus the target in textual form.
#[derive(Debug, Clone)]
pub struct Request {
    pub command: u8,
    pub host: String,
    pub port: u16,
}

/// Method negotiation. The selection reply goes out before the version is
/// enforced, so a non-SOCKS5 client still gets a well-formed refusal.
pub async fn negotiate<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    if head[0] != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not a SOCKS5 client (version {})", head[0]),
        ));
    }
    Ok(())
}

pub async fn read_request<S>(stream: &mut S) -> io::Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad request version",
        ));
    }
    let host = read_addr(stream, head[3]).await?;
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(Request {
        command: head[1],
        host,
        port: u16::from_be_bytes(port),
    })
}

async fn read_addr<S>(stream: &mut S, atyp: u8) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ok(Ipv4Addr::from(octets).to_string())
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "domain is not valid utf-8")
            })
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ok(Ipv6Addr::from(octets).to_string())
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported address type {other}"),
        )),
    }
}

/// Reply to a CONNECT (or a rejection): `5, code, 0, 1, 0.0.0.0:0`.
pub async fn write_reply<S>(stream: &mut S, code: u8) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, code, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await
}

/// Reply to a UDP ASSOCIATE with the locally bound relay endpoint.
pub async fn write_bind_reply<S>(stream: &mut S, code: u8, addr: SocketAddr) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(22);
    reply.extend_from_slice(&[VERSION, code, 0]);
    match addr.ip() {
        IpAddr::V4(ip) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&addr.port().to_be_bytes());
    stream.write_all(&reply).await
}

/// Parse one RFC 1928 UDP relay packet from the application:
/// `RSV RSV FRAG ATYP DST.ADDR DST.PORT DATA`. Fragmented packets are not
/// supported and surface as an error the caller drops silently.
pub fn parse_udp_packet(packet: &[u8]) -> io::Result<(String, u16, &[u8])> {
    let malformed = || io::Error::new(io::ErrorKind::InvalidData, "malformed udp packet");
    if packet.len() < 4 {
        return Err(malformed());
    }
    if packet[2] != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "fragmented udp packet",
        ));
    }
    let (host, rest) = match packet[3] {
        ATYP_IPV4 => {
            if packet.len() < 8 {
                return Err(malformed());
            }
            let octets = <[u8; 4]>::try_from(&packet[4..8]).unwrap();
            (Ipv4Addr::from(octets).to_string(), &packet[8..])
        }
        ATYP_DOMAIN => {
            let len = *packet.get(4).ok_or_else(malformed)? as usize;
            if packet.len() < 5 + len {
                return Err(malformed());
            }
            let name = String::from_utf8(packet[5..5 + len].to_vec())
                .map_err(|_| malformed())?;
            (name, &packet[5 + len..])
        }
        ATYP_IPV6 => {
            if packet.len() < 20 {
                return Err(malformed());
            }
            let octets = <[u8; 16]>::try_from(&packet[4..20]).unwrap();
            (Ipv6Addr::from(octets).to_string(), &packet[20..])
        }
        _ => return Err(malformed()),
    };
    if rest.len() < 2 {
        return Err(malformed());
    }
    let port = u16::from_be_bytes([rest[0], rest[1]]);
    Ok((host, port, &rest[2..]))
}

/// Wrap a reply datagram in the UDP relay header for the application.
pub fn encode_udp_packet(host: &str, port: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(22 + data.len());
    packet.extend_from_slice(&[0, 0, 0]);
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            packet.push(ATYP_IPV4);
            packet.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            packet.push(ATYP_IPV6);
            packet.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            packet.push(ATYP_DOMAIN);
            packet.push(host.len().min(255) as u8);
            packet.extend_from_slice(&host.as_bytes()[..host.len().min(255)]);
        }
    }
    packet.extend_from_slice(&port.to_be_bytes());
    packet.extend_from_slice(data);
    packet
}
