//! vaultfs-server binary
//!
//! ## Usage
//!
//! ```bash
//! VAULT_ADDR=https://vault:8200 VAULT_TOKEN=... vaultfs-server
//! vaultfs-server --url http://127.0.0.1:8200 --token root --root /mnt/secrets
//!
//! docker volume create -d vault --name db \
//!     -o policy-rules=$(base64 -w0 db.hcl)
//! docker run -v db:/secrets alpine cat /secrets/secret/db/password
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use vaultfs_kernel::{Mounter, VolumeDriver};
use vaultfs_server::{Config, MemlockOutcome, PluginServer, lock_memory};
use vaultfs_store::VaultConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    // Exits with usage if the address or token is missing.
    let config = Config::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    match lock_memory().context("failed to lock process memory")? {
        MemlockOutcome::Locked => tracing::debug!("process memory locked"),
        MemlockOutcome::Unsupported => {
            tracing::warn!("mlockall is not implemented on this platform; secrets may reach swap")
        }
        MemlockOutcome::LimitTooLow => {
            tracing::warn!("memory lock limit too low for mlockall; secrets may reach swap")
        }
    }

    let connector = VaultConnector::new(&config.store_config())
        .context("invalid secret store configuration")?;
    let runtime = Handle::current();
    let driver = Arc::new(VolumeDriver::new(
        config.driver_config(),
        Arc::new(connector),
        mounter(runtime.clone()),
    ));

    tracing::info!(
        url = %config.url,
        root = %config.root.display(),
        insecure = config.insecure,
        "starting vaultfs plugin"
    );

    let server = Arc::new(PluginServer::bind(&config.socket)?);
    let stop = server.stopper();
    let serving = {
        let server = Arc::clone(&server);
        tokio::task::spawn_blocking(move || server.run(driver, runtime))
    };

    tokio::select! {
        result = serving => result.context("plugin server thread failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to wait for shutdown signal")?;
            tracing::info!("shutting down");
            stop();
        }
    }
    Ok(())
}

#[cfg(feature = "fuse")]
fn mounter(runtime: Handle) -> Arc<dyn Mounter> {
    Arc::new(vaultfs_server::FuseMounter::new(runtime))
}

#[cfg(not(feature = "fuse"))]
fn mounter(_runtime: Handle) -> Arc<dyn Mounter> {
    tracing::warn!("built without FUSE; volumes are tracked but never attached");
    Arc::new(vaultfs_kernel::NullMounter::new())
}
