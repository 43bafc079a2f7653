//! Vecna license agent
//!
//! Activates a license key for this machine, keeps it alive with periodic
//! heartbeats and watches for tampering while the licensed payload is in use.
//!
//! Usage:
//!   vecna-agent --key ABCD-1234 --install-archive payload.zip
//!
//! With no `--key` the key stored by a previous run is used.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vecna_agent::{AgentExit, AgentOptions, run, write_crash_record};
use vecna_guard::{DEFAULT_SIGNAL_PORT, GuardError, InstanceGuard, NativePlatform};
use vecna_license::{ClientConfig, default_config_dir};

#[derive(Parser, Debug)]
#[command(name = "vecna-agent")]
#[command(about = "Vecna license agent", version)]
struct Args {
    /// License key to activate
    #[arg(short, long, env = "VECNA_LICENSE_KEY")]
    key: Option<String>,

    /// Payload archive to install after activation
    #[arg(long)]
    install_archive: Option<PathBuf>,

    /// Folder the payload is installed under
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Base URL of the key API
    #[arg(long, env = "VECNA_API_BASE")]
    api_base: Option<String>,

    /// URL of the public settings endpoint
    #[arg(long, env = "VECNA_SETTINGS_URL")]
    settings_url: Option<String>,

    /// Request signing secret
    #[arg(long, env = "VECNA_SIGN_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Seconds between heartbeats
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Expected SHA-256 prefix of the payload archive
    #[arg(long)]
    payload_digest: Option<String>,

    /// Loopback port for extension signals
    #[arg(long, default_value_t = DEFAULT_SIGNAL_PORT)]
    signal_port: u16,

    /// File to watch for on-disk modification
    #[arg(long)]
    integrity_file: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(url) = &self.api_base {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &self.settings_url {
            config.settings_url = url.clone();
        }
        if let Some(secret) = &self.secret {
            config.sign_secret = secret.clone();
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_interval_secs = secs;
        }
        config.payload_digest = self.payload_digest.clone();
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str())),
        )
        .with_target(false)
        .compact()
        .init();

    let config_dir = match default_config_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    install_panic_hook(config_dir.clone());

    match start(args, config_dir.clone()).await {
        Ok(exit) => std::process::exit(exit.exit_code()),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            if let Err(log_err) = write_crash_record(&config_dir, &format!("{e:#}")) {
                warn!("Could not write crash record: {}", log_err);
            }
            std::process::exit(1);
        }
    }
}

async fn start(args: Args, config_dir: PathBuf) -> Result<AgentExit> {
    let _instance = match InstanceGuard::acquire(&config_dir) {
        Ok(guard) => guard,
        Err(GuardError::AlreadyRunning) => {
            warn!("Another instance of the agent is already running");
            return Ok(AgentExit::Shutdown);
        }
        Err(e) => return Err(e).context("single-instance check failed"),
    };

    let options = AgentOptions {
        license_key: args.key.clone(),
        install_archive: args.install_archive.clone(),
        install_dir: args.install_dir.clone(),
        signal_port: args.signal_port,
        integrity_file: args.integrity_file.clone(),
        ..AgentOptions::new(args.client_config(), config_dir)
    };

    let exit = run(options, Arc::new(NativePlatform), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    match &exit {
        AgentExit::Shutdown => info!("Agent stopped"),
        AgentExit::NotActivated(e) => error!("License not activated: {}", e),
        AgentExit::Fatal(reason) => error!("Exiting after defense: {}", reason),
    }
    Ok(exit)
}

fn install_panic_hook(config_dir: PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = write_crash_record(&config_dir, &format!("panic: {info}"));
        default_hook(info);
    }));
}
