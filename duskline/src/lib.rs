//! Two-process tunnelling SOCKS5 proxy.
//!
//! The client half listens for SOCKS5 applications and forwards each proxy
//! request over a PSK-authenticated encrypted tunnel; the server half makes
//! the outward TCP connections and UDP sends on the client's behalf.

pub mod client;
pub mod config;
pub mod opt;
pub mod proto;
pub mod relay;
pub mod server;
pub mod socks5;
pub mod udp;
