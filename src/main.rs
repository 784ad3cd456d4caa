use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use ota_agent::config;
use ota_agent::identity::DeviceIdentity;
use ota_agent::ota::{CycleOutcome, UpdateOrchestrator};
use ota_agent::storage::FileSlotStore;
use ota_agent::transport::HttpTransport;

// Status posts are short; don't let a slow server hold up the cycle as
// long as a download is allowed to.
const REPORT_TIMEOUT_SECS: u64 = 10;

#[derive(Parser)]
#[command(name = "ota-agent")]
#[command(about = "Firmware update agent - polls the update server and installs new builds", version)]
struct Cli {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = "ota-agent.json")]
    config: PathBuf,

    /// Override the update server URL from the config file
    #[arg(long)]
    server_url: Option<String>,

    /// Run a single update cycle and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = config::load_or_default(&cli.config)?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }

    info!("ota-agent {} starting", env!("CARGO_PKG_VERSION"));

    let storage = FileSlotStore::open(&config.storage_dir).context("open slot storage")?;

    // The version we report is whatever the active boot image carries, not
    // what this binary was compiled as.
    let mut identity = DeviceIdentity::from_config(&config);
    if let Some(record) = storage.boot_record().context("read boot record")? {
        identity.refresh_from_boot_record(&record);
    }
    info!("{identity}");

    let timeout = Duration::from_secs(config.http_timeout_secs);
    let transport =
        HttpTransport::new(timeout, config.auth_token.clone()).context("build http client")?;
    let reporter_transport = HttpTransport::new(
        Duration::from_secs(REPORT_TIMEOUT_SECS),
        config.auth_token.clone(),
    )
    .context("build status http client")?;

    let mut orchestrator = UpdateOrchestrator::new(&config, transport, reporter_transport, storage);

    loop {
        match orchestrator.run_cycle(&identity) {
            CycleOutcome::NoUpdate => {}
            CycleOutcome::CheckFailed(_) => {
                // Already logged; the next cycle retries from scratch
            }
            CycleOutcome::Installed {
                version,
                build_number,
                bytes_written,
            } => {
                info!(
                    "firmware v{version} build {build_number} installed ({bytes_written} bytes), restart to boot it"
                );
                if let Err(e) = orchestrator
                    .storage_mut()
                    .record_installed(&version, build_number)
                {
                    log::warn!("could not record installed version: {e}");
                }
                identity.advance(&version, build_number);
            }
            CycleOutcome::InstallFailed(e) => {
                log::error!("update failed: {e}");
            }
        }

        if cli.once {
            break;
        }
        thread::sleep(Duration::from_secs(config.check_interval_secs));
    }

    Ok(())
}
