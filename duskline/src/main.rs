use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use duskline::config::{ClientConfig, ServerConfig};
use duskline::opt::{Opt, Role};
use duskline::{client, server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Opt::parse().role {
        Role::Client(opt) => client::run(ClientConfig::resolve(opt)?).await,
        Role::Server(opt) => server::run(ServerConfig::resolve(opt)?).await,
    }
}
