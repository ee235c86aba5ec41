//! UDP association over the tunnel.
//!
//! The server end owns an unconnected UDP socket and multiplexes datagrams
//! with their address headers onto the tunnel; the client end mirrors the
//! same pattern between its local SOCKS5 relay socket and the tunnel. Both
//! ends run two encapsulation loops plus a single-shot idle watcher; when
//! nothing moves for [`IDLE_TIMEOUT`] the watcher fires, the `select!`
//! drops the socket and the tunnel, and the peer's loops error out on
//! their next I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::proto;
use crate::socks5;

/// A UDP session ends this long after the last datagram in either direction.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 65535;

/// Keep-alive traffic for the idle watcher.
#[derive(Debug)]
enum Pulse {
    Alive,
    Exit,
}

/// Waits out `window` between pulses; resolves `true` (fired) if a full
/// window passes with no `Alive`, `false` if an `Exit` arrives first.
/// Fires at most once either way.
async fn idle_watcher(mut pulses: mpsc::Receiver<Pulse>, window: Duration) -> bool {
    loop {
        match timeout(window, pulses.recv()).await {
            Ok(Some(Pulse::Alive)) => continue,
            Ok(Some(Pulse::Exit)) | Ok(None) => return false,
            Err(_elapsed) => return true,
        }
    }
}

/// Server side: relay between the tunnel and a freshly bound outbound
/// socket until close or idle timeout.
pub async fn serve_associator<T>(tunnel: T, socket: UdpSocket, window: Duration) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel);
    let (pulse, pulses) = mpsc::channel(4);
    tokio::select! {
        done = tunnel_to_socket(&mut tunnel_read, &socket, &pulse) => done,
        done = socket_to_tunnel(&socket, &mut tunnel_write, &pulse) => done,
        fired = idle_watcher(pulses, window) => {
            if fired {
                debug!("udp session idle, closing");
            }
            Ok(())
        }
    }
}

async fn tunnel_to_socket<R>(
    tunnel: &mut R,
    socket: &UdpSocket,
    pulse: &mpsc::Sender<Pulse>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let done = loop {
        let datagram = match proto::read_datagram(tunnel).await {
            Ok(datagram) => datagram,
            Err(e) => break e,
        };
        trace!(
            host = %datagram.host,
            port = datagram.port,
            len = datagram.data.len(),
            "udp out",
        );
        if let Err(e) = socket
            .send_to(&datagram.data, (datagram.host.as_str(), datagram.port))
            .await
        {
            break e;
        }
        let _ = pulse.try_send(Pulse::Alive);
    };
    let _ = pulse.try_send(Pulse::Exit);
    Err(done)
}

async fn socket_to_tunnel<W>(
    socket: &UdpSocket,
    tunnel: &mut W,
    pulse: &mpsc::Sender<Pulse>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let done = loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => break e,
        };
        trace!(%from, len = n, "udp in");
        let host = from.ip().to_string();
        if let Err(e) = proto::write_datagram(tunnel, &host, from.port(), &buf[..n]).await {
            break e;
        }
        let _ = pulse.try_send(Pulse::Alive);
    };
    let _ = pulse.try_send(Pulse::Exit);
    Err(done)
}

/// Client side: relay between the local SOCKS5 UDP endpoint and the tunnel.
///
/// The application's address is learned from its first datagram; replies
/// arriving before that are dropped.
pub async fn serve_client_mirror<T>(
    tunnel: T,
    socket: UdpSocket,
    window: Duration,
) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let app_addr = Mutex::new(None::<SocketAddr>);
    let (mut tunnel_read, mut tunnel_write) = tokio::io::split(tunnel);
    let (pulse, pulses) = mpsc::channel(4);
    tokio::select! {
        done = app_to_tunnel(&socket, &mut tunnel_write, &pulse, &app_addr) => done,
        done = tunnel_to_app(&mut tunnel_read, &socket, &pulse, &app_addr) => done,
        fired = idle_watcher(pulses, window) => {
            if fired {
                debug!("udp association idle, closing");
            }
            Ok(())
        }
    }
}

async fn app_to_tunnel<W>(
    socket: &UdpSocket,
    tunnel: &mut W,
    pulse: &mpsc::Sender<Pulse>,
    app_addr: &Mutex<Option<SocketAddr>>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let done = loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => break e,
        };
        *app_addr.lock().unwrap() = Some(from);
        let (host, port, data) = match socks5::parse_udp_packet(&buf[..n]) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(%from, "dropping udp packet: {e}");
                continue;
            }
        };
        if let Err(e) = proto::write_datagram(tunnel, &host, port, data).await {
            break e;
        }
        let _ = pulse.try_send(Pulse::Alive);
    };
    let _ = pulse.try_send(Pulse::Exit);
    Err(done)
}

async fn tunnel_to_app<R>(
    tunnel: &mut R,
    socket: &UdpSocket,
    pulse: &mpsc::Sender<Pulse>,
    app_addr: &Mutex<Option<SocketAddr>>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let done = loop {
        let datagram = match proto::read_datagram(tunnel).await {
            Ok(datagram) => datagram,
            Err(e) => break e,
        };
        let Some(to) = *app_addr.lock().unwrap() else {
            trace!("reply before any application datagram, dropping");
            continue;
        };
        let packet = socks5::encode_udp_packet(&datagram.host, datagram.port, &datagram.data);
        if let Err(e) = socket.send_to(&packet, to).await {
            break e;
        }
        let _ = pulse.try_send(Pulse::Alive);
    };
    let _ = pulse.try_send(Pulse::Exit);
    Err(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn watcher_fires_after_a_silent_window() {
        let (_pulse, pulses) = mpsc::channel(4);
        let started = Instant::now();
        assert!(idle_watcher(pulses, IDLE_TIMEOUT).await);
        assert_eq!(started.elapsed(), IDLE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalives_defer_the_watcher() {
        let (pulse, pulses) = mpsc::channel(4);
        let watcher = tokio::spawn(idle_watcher(pulses, IDLE_TIMEOUT));
        let started = Instant::now();
        for _ in 0..10 {
            sleep(Duration::from_secs(59)).await;
            pulse.send(Pulse::Alive).await.unwrap();
        }
        drop(pulse);
        assert!(!watcher.await.unwrap(), "watcher fired during keepalives");
        assert!(started.elapsed() >= Duration::from_secs(590));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_preempts_firing() {
        let (pulse, pulses) = mpsc::channel(4);
        pulse.send(Pulse::Exit).await.unwrap();
        assert!(!idle_watcher(pulses, IDLE_TIMEOUT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn associator_tears_down_when_idle() {
        let (tunnel, peer) = tokio::io::duplex(1024);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let started = Instant::now();
        serve_associator(tunnel, socket, IDLE_TIMEOUT).await.unwrap();
        assert!(started.elapsed() >= IDLE_TIMEOUT);
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn client_mirror_tears_down_when_idle() {
        let (tunnel, peer) = tokio::io::duplex(1024);
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let started = Instant::now();
        serve_client_mirror(tunnel, socket, IDLE_TIMEOUT)
            .await
            .unwrap();
        assert!(started.elapsed() >= IDLE_TIMEOUT);
        drop(peer);
    }
}
