//! Server run loop: authenticate tunnels and perform the outward
//! connections they ask for.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use duskline_tunnel::{Psk, Server as TunnelServer};

use crate::config::ServerConfig;
use crate::{proto, relay, udp};

pub async fn run(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    let psk = Psk::new(config.psk.as_bytes())?;
    info!("tunnel server listening on {}", config.listen);
    serve(listener, psk).await
}

pub async fn serve(listener: TcpListener, psk: Psk) -> Result<()> {
    let server = Arc::new(TunnelServer::new(psk));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        debug!("[+] {peer}");
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tunnel(server, stream, peer).await {
                debug!("tunnel from {peer} closed: {e}");
            }
        });
    }
}

async fn handle_tunnel(
    server: Arc<TunnelServer>,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    let mut tunnel = server.accept(stream).await?;
    debug!("authenticated {peer}");
    match proto::read_request(&mut tunnel).await? {
        proto::Request::Tcp { host, port } => {
            debug!("{peer} ==tcp=> {host}:{port}");
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(outbound) => {
                    proto::write_response(&mut tunnel, proto::REP_SUCCESS).await?;
                    relay::relay(tunnel, outbound).await?;
                    debug!("{peer} ==tcp=> {host}:{port} done");
                    Ok(())
                }
                Err(e) => {
                    debug!("{peer} ==tcp=> {host}:{port} failed: {e}");
                    proto::write_response(&mut tunnel, proto::dial_error_code(&e)).await?;
                    Err(e)
                }
            }
        }
        proto::Request::Udp => match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => {
                proto::write_response(&mut tunnel, proto::REP_SUCCESS).await?;
                debug!("{peer} ==udp=> {}", socket.local_addr()?);
                udp::serve_associator(tunnel, socket, udp::IDLE_TIMEOUT).await?;
                debug!("{peer} ==udp=> done");
                Ok(())
            }
            Err(e) => {
                debug!("{peer} udp bind failed: {e}");
                proto::write_response(&mut tunnel, proto::REP_FAILURE).await?;
                Err(e)
            }
        },
    }
}
