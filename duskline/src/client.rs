//! Client run loop: accept SOCKS5 applications, carry each request over a
//! tunnel to the next server in the pool.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use duskline_tunnel::Client as TunnelClient;

use crate::config::{ClientConfig, ServerPool};
use crate::{proto, relay, socks5, udp};

pub async fn run(config: ClientConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    let pool = Arc::new(ServerPool::new(&config.servers)?);
    info!("socks5 listening on {}", config.listen);
    serve(listener, pool).await
}

pub async fn serve(listener: TcpListener, pool: Arc<ServerPool>) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        debug!("[+] {peer}");
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_session(stream, peer, pool).await {
                debug!("session with {peer} closed: {e}");
            }
        });
    }
}

async fn handle_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    pool: Arc<ServerPool>,
) -> io::Result<()> {
    socks5::negotiate(&mut stream).await?;
    let request = socks5::read_request(&mut stream).await?;
    match request.command {
        socks5::CMD_CONNECT => connect_session(stream, peer, request, &pool).await,
        socks5::CMD_UDP_ASSOCIATE => associate_session(stream, peer, &pool).await,
        socks5::CMD_BIND => {
            socks5::write_reply(&mut stream, socks5::REP_NOT_ALLOWED).await?;
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "BIND is not supported",
            ))
        }
        other => {
            socks5::write_reply(&mut stream, socks5::REP_COMMAND_NOT_SUPPORTED).await?;
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported command {other}"),
            ))
        }
    }
}

/// Dial the next tunnel server and handshake. Failures close the SOCKS5
/// stream without a reply; only inner response codes are reflected back.
async fn open_tunnel(
    pool: &ServerPool,
) -> io::Result<duskline_tunnel::TunnelStream<TcpStream>> {
    let (addr, psk) = pool.next();
    let remote = TcpStream::connect(addr.as_str()).await?;
    let tunnel = TunnelClient::new(psk.clone()).connect(remote).await?;
    Ok(tunnel)
}

async fn connect_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    request: socks5::Request,
    pool: &ServerPool,
) -> io::Result<()> {
    let mut tunnel = open_tunnel(pool).await?;
    proto::write_request(
        &mut tunnel,
        &proto::Request::Tcp {
            host: request.host.clone(),
            port: request.port,
        },
    )
    .await?;
    let code = proto::read_response(&mut tunnel).await?;
    socks5::write_reply(&mut stream, code).await?;
    if code != proto::REP_SUCCESS {
        return Err(io::Error::other(format!(
            "target unreachable (code {code})"
        )));
    }
    debug!("{peer} ==tcp=> {}:{}", request.host, request.port);
    relay::relay(stream, tunnel).await?;
    debug!("{peer} ==tcp=> {}:{} done", request.host, request.port);
    Ok(())
}

async fn associate_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    pool: &ServerPool,
) -> io::Result<()> {
    let mut tunnel = open_tunnel(pool).await?;
    proto::write_request(&mut tunnel, &proto::Request::Udp).await?;
    let code = proto::read_response(&mut tunnel).await?;
    if code != proto::REP_SUCCESS {
        socks5::write_reply(&mut stream, code).await?;
        return Err(io::Error::other(format!("udp refused (code {code})")));
    }

    // Bind the relay endpoint on the same interface the application reached
    // us on, so the reply address is routable from its point of view.
    let local_ip = stream.local_addr()?.ip();
    let socket = match UdpSocket::bind((local_ip, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            socks5::write_reply(&mut stream, proto::REP_FAILURE).await?;
            return Err(e);
        }
    };
    let bound = socket.local_addr()?;
    socks5::write_bind_reply(&mut stream, proto::REP_SUCCESS, bound).await?;

    // The association lives on the tunnel until idle; the SOCKS5 control
    // stream has served its purpose.
    drop(stream);
    debug!("{peer} ==udp=> relay {bound}");
    udp::serve_client_mirror(tunnel, socket, udp::IDLE_TIMEOUT).await?;
    debug!("{peer} ==udp=> relay {bound} done");
    Ok(())
}
