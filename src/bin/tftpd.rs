use anyhow::Context;
use clap::Parser;
use tokio::time::Duration;

use tftp::{Server, ServerCli, ServerConfig, TransferOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerCli::parse();

    env_logger::Builder::new()
        .filter_level(tftp::log_level(args.verbose))
        .parse_default_env()
        .init();

    let directory = args
        .directory
        .canonicalize()
        .with_context(|| format!("Work directory {} is not usable", args.directory.display()))?;
    if !directory.is_dir() {
        anyhow::bail!("Path is not a directory: {}", directory.display());
    }

    let options = TransferOptions::default()
        .with_timeout(Duration::from_millis(args.timeout))
        .with_max_retries(args.retry);
    let config =
        ServerConfig::new(args.ip, args.port, directory, args.read_only).with_options(options);
    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.ip, args.port))?;

    log::info!(
        "TFTP server listen on {}, workdir: {}",
        server.local_addr()?,
        config.directory.display()
    );
    log::info!(
        "read-only: {}, timeout: {} ms, retry: {}",
        args.read_only,
        args.timeout,
        args.retry
    );

    server.serve().await?;
    Ok(())
}
