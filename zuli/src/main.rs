//! Interactive controller for Zuli smartplugs
//!
//! Discovers plugs in the background and reads commands from stdin until
//! `quit`.

mod command;
mod dispatch;
mod repl;

use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::io::BufReader;
use zuli_ble_controller::{Session, SessionConfig};

#[derive(Parser)]
#[command(name = "zuli")]
#[command(about = "Interactive controller for Zuli smartplugs")]
struct Cli {
    /// Bluetooth adapter to use, by index
    #[arg(short, long, env = "ZULI_ADAPTER", default_value = "0")]
    adapter: usize,
    /// Seconds to wait for a plug to answer a command
    #[arg(short, long, env = "ZULI_TIMEOUT", default_value = "10")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = SessionConfig {
        adapter_index: cli.adapter,
        command_timeout: Duration::from_secs(cli.timeout),
    };
    let session = Session::start(&config).await?;
    info!("scanning with {config:?}");

    println!("Ready. Devices will continue to connect in the background");
    let result = repl::run(
        session.registry(),
        BufReader::new(tokio::io::stdin()),
        &mut std::io::stdout(),
        interrupted(),
    )
    .await;

    println!("Stopping discovery and closing all connections");
    session.close().await;
    result?;
    // a blocked stdin read would otherwise hold runtime shutdown until Enter
    std::process::exit(0)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
