//! Configuration loading and validation.
//!
//! Either a TOML file or direct CLI flags; both funnel into the same
//! structures. PSK length violations are fatal before any socket is bound.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use duskline_tunnel::Psk;

use crate::opt::{ClientOpt, ServerOpt};

/// Client side: a local SOCKS5 listener and one or more tunnel servers.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub listen: SocketAddr,
    pub servers: Vec<ServerEndpoint>,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerEndpoint {
    pub addr: String,
    pub psk: String,
}

/// Server side: the tunnel listener and its key.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub psk: String,
}

impl ClientConfig {
    pub fn resolve(opt: ClientOpt) -> Result<Self> {
        if let Some(path) = opt.config {
            return Self::load(&path);
        }
        match (opt.listen, opt.server, opt.key) {
            (Some(listen), Some(addr), Some(psk)) => {
                let config = ClientConfig {
                    listen,
                    servers: vec![ServerEndpoint { addr, psk }],
                };
                config.validate()?;
                Ok(config)
            }
            _ => bail!("either --config or all of --listen, --server and --key are required"),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ClientConfig =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            bail!("no servers configured");
        }
        for server in &self.servers {
            Psk::new(server.psk.as_bytes())
                .with_context(|| format!("server {}", server.addr))?;
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn resolve(opt: ServerOpt) -> Result<Self> {
        let config = if let Some(path) = opt.config {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            match (opt.listen, opt.key) {
                (Some(listen), Some(psk)) => ServerConfig { listen, psk },
                _ => bail!("either --config or both --listen and --key are required"),
            }
        };
        Psk::new(config.psk.as_bytes())?;
        Ok(config)
    }
}

/// Round-robin pool over the configured tunnel servers; one pick per new
/// proxy session.
pub struct ServerPool {
    servers: Vec<(String, Psk)>,
    next: AtomicUsize,
}

impl ServerPool {
    pub fn new(endpoints: &[ServerEndpoint]) -> Result<Self> {
        if endpoints.is_empty() {
            bail!("no servers configured");
        }
        let servers = endpoints
            .iter()
            .map(|endpoint| {
                let psk = Psk::new(endpoint.psk.as_bytes())
                    .with_context(|| format!("server {}", endpoint.addr))?;
                Ok((endpoint.addr.clone(), psk))
            })
            .collect::<Result<_>>()?;
        Ok(ServerPool {
            servers,
            next: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> &(String, Psk) {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        &self.servers[i]
    }
}
