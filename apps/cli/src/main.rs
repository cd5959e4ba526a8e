//! treepush entry point.

mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use treepush_engine::{Connector, DeployDriver, LocalConnector};
use treepush_sftp::{SftpConnector, SftpOptions};

use crate::config::{Config, DEFAULT_CONFIG_FILE, Transport};

#[derive(Parser)]
#[command(
    name = "treepush",
    version,
    about = "Push a local directory tree to a remote host over SFTP"
)]
struct Cli {
    /// Configuration file (defaults to ./treepush.toml when present).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload the local tree to the remote directory.
    Deploy(DeployArgs),
    /// Write a starter configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Default)]
struct DeployArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, short)]
    user: Option<String>,
    /// Local directory to upload.
    #[arg(long)]
    local: Option<PathBuf>,
    /// Remote directory that receives the upload.
    #[arg(long)]
    remote: Option<String>,
    /// Maximum channels open at once, the primary channel included.
    #[arg(long, short)]
    workers: Option<usize>,
    /// Upload one file at a time over a single channel.
    #[arg(long)]
    sequential: bool,
    #[arg(long, value_enum)]
    transport: Option<Transport>,
    /// Mount point used as the remote root with `--transport local`.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Private key for SSH authentication.
    #[arg(long)]
    key: Option<PathBuf>,
    /// Authenticate through the running SSH agent.
    #[arg(long)]
    agent: bool,
    /// Additional directory name to skip (repeatable).
    #[arg(long = "exclude", value_name = "NAME")]
    exclude: Vec<String>,
    /// Print the plan without connecting.
    #[arg(long)]
    dry_run: bool,
    /// Print the result as JSON instead of progress lines.
    #[arg(long)]
    json: bool,
}

impl DeployArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = &self.user {
            config.username = user.clone();
        }
        if let Some(local) = &self.local {
            config.local_dir = local.clone();
        }
        if let Some(remote) = &self.remote {
            config.remote_dir = remote.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.sequential {
            config.parallel = false;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(store) = &self.store {
            config.local_store = Some(store.clone());
        }
        if let Some(key) = &self.key {
            config.key_file = Some(key.clone());
        }
        if self.agent {
            config.use_agent = true;
        }
        for name in &self.exclude {
            if !config.exclude.contains(name) {
                config.exclude.push(name.clone());
            }
        }
    }
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries progress lines and JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Init { force } => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            Config::default().save(&path, force)?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Deploy(args) => {
            let mut config = Config::load(cli.config.as_deref())?;
            args.apply(&mut config);

            // Build and run the tokio runtime.
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(deploy(config, args))
        }
    }
}

async fn deploy(config: Config, args: DeployArgs) -> anyhow::Result<ExitCode> {
    let deploy_config = config.to_deploy_config(|key| std::env::var(key).ok())?;

    let connector: Arc<dyn Connector> = match config.transport {
        Transport::Sftp => Arc::new(SftpConnector::new(SftpOptions {
            concurrent_channels: config.parallel,
            ..SftpOptions::default()
        })),
        Transport::Local => {
            let store = config
                .local_store
                .clone()
                .context("local_store is required for the local transport")?;
            Arc::new(LocalConnector::new(store))
        }
    };

    let mut driver = DeployDriver::new(deploy_config, connector);

    if args.dry_run {
        let plan = driver.plan()?;
        output::print_plan(&plan);
        return Ok(ExitCode::SUCCESS);
    }

    let events = driver
        .take_events()
        .context("deploy events already taken")?;
    let printer = tokio::spawn(output::print_events(events, args.json));

    let cancel = driver.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; finishing in-flight transfers");
            cancel.cancel();
        }
    });

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        local = %config.local_dir.display(),
        remote = %config.remote_dir,
        "starting deploy"
    );
    let outcome = driver.run().await;

    // Dropping the driver closes the event stream so the printer drains.
    drop(driver);
    join_printer(printer).await;

    match outcome {
        Ok(result) => {
            if args.json {
                println!("{}", result.to_json()?);
            } else {
                output::print_summary(&result);
            }
            Ok(output::exit_code(&result))
        }
        Err(e) => {
            eprintln!("Deployment failed: {e}");
            eprintln!("Connection closed.");
            Ok(ExitCode::from(2))
        }
    }
}

/// Waits for the progress printer; returns false if it did not finish cleanly.
async fn join_printer(printer: tokio::task::JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "progress printer aborted");
            false
        }
    }
}
