use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::time::Duration;

use tftp::{Client, ClientConfig, Cli, Endpoint, TransferMode};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    env_logger::Builder::new()
        .filter_level(tftp::log_level(args.verbose))
        .parse_default_env()
        .init();

    tokio::select! {
        res = run(&args) => match res {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{e:#}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, transfer aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Cli) -> anyhow::Result<()> {
    let server = SocketAddr::new(args.server_ip, args.server_port);
    let endpoint = if args.learn_peer {
        Endpoint::Learn
    } else {
        Endpoint::Fixed
    };
    let config = ClientConfig::new(server)
        .with_timeout(Duration::from_millis(args.timeout))
        .with_max_retries(args.retry)
        .with_endpoint(endpoint);
    let client = Client::new(config);
    let local = args.local_path();

    match args.mode {
        TransferMode::Read => {
            client
                .get(&args.filename, &local)
                .await
                .with_context(|| format!("Read of '{}' from {server} failed", args.filename))?;
        }
        TransferMode::Write => {
            client
                .put(&local, &args.filename)
                .await
                .with_context(|| format!("Write of '{}' to {server} failed", local.display()))?;
        }
    }
    Ok(())
}
