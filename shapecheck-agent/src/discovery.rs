//! Host identification for reports
//!
//! Hostname, OS, architecture and the network interfaces the host has up.

use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One configured address of a network interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub architecture: String,
    pub interfaces: Vec<NetworkInterface>,
}

impl HostInfo {
    pub fn discover() -> Result<Self> {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let interfaces = Self::interfaces().context("Failed to enumerate network interfaces")?;

        info!("Host {} with {} interface addresses", hostname, interfaces.len());

        Ok(HostInfo {
            hostname,
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            interfaces,
        })
    }

    fn interfaces() -> Result<Vec<NetworkInterface>> {
        let mut interfaces = Vec::new();
        for if_addr in get_if_addrs()? {
            if if_addr.is_loopback() {
                continue;
            }
            let ip = match if_addr.addr {
                IfAddr::V4(v4) => v4.ip.to_string(),
                IfAddr::V6(v6) => v6.ip.to_string(),
            };
            debug!("Found interface: {} ({})", if_addr.name, ip);
            interfaces.push(NetworkInterface {
                name: if_addr.name,
                ip,
            });
        }
        Ok(interfaces)
    }

    /// Interface names, each listed once
    pub fn interface_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.interfaces.iter().map(|i| i.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
