use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "duskline", version, about = "Tunnelling SOCKS5 proxy")]
pub struct Opt {
    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand)]
pub enum Role {
    /// Run the local SOCKS5 end of the tunnel
    Client(ClientOpt),
    /// Run the remote end of the tunnel
    Server(ServerOpt),
}

#[derive(Args)]
pub struct ClientOpt {
    /// TOML config file with the listen address and server list
    #[arg(short, long, conflicts_with_all = ["listen", "server", "key"])]
    pub config: Option<PathBuf>,
    /// Local SOCKS5 listen address, e.g. 127.0.0.1:7071
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,
    /// Tunnel server endpoint as host:port
    #[arg(short, long)]
    pub server: Option<String>,
    /// Pre-shared key (16, 32 or 64 bytes)
    #[arg(short, long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct ServerOpt {
    /// TOML config file with the listen address and key
    #[arg(short, long, conflicts_with_all = ["listen", "key"])]
    pub config: Option<PathBuf>,
    /// Tunnel listen address, e.g. 0.0.0.0:8081
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,
    /// Pre-shared key (16, 32 or 64 bytes)
    #[arg(short, long)]
    pub key: Option<String>,
}
