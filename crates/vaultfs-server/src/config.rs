//! Command-line configuration.

use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::path::PathBuf;
use std::time::Duration;

use vaultfs_kernel::DriverConfig;
use vaultfs_store::StoreConfig;

use crate::constants::{DEFAULT_ROOT, DEFAULT_SOCKET};

/// Docker volume plugin exposing secret store paths as read-only mounts.
#[derive(Parser, Clone)]
#[command(name = "vaultfs-server")]
#[command(about = "Serve secret store paths as read-only Docker volumes")]
pub struct Config {
    /// Directory under which volumes are mounted
    #[arg(long, default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Secret store address
    #[arg(long, env = "VAULT_ADDR", value_parser = NonEmptyStringValueParser::new())]
    pub url: String,

    /// Root token, used for new volumes and for policy provisioning
    #[arg(
        long,
        env = "VAULT_TOKEN",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub token: String,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Unix socket to serve the plugin protocol on
    #[arg(long, default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Per-request timeout for backend calls, in seconds
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("root", &self.root)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("socket", &self.socket)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    /// Backend connection settings shared by every client.
    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig::new(&self.url, self.insecure);
        match self.request_timeout {
            Some(secs) => config.with_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(&self.root, &self.token)
    }
}
