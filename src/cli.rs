use anstyle::AnsiColor;
use clap::builder::styling::Styles;
use clap::{ArgAction, Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::{DEF_TIMEOUT_MS, MAX_RETRY_COUNT};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default())
    .usage(AnsiColor::Green.on_default())
    .literal(AnsiColor::Cyan.on_default())
    .placeholder(AnsiColor::Red.on_default());

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// Read the file from the server
    #[value(name = "r")]
    Read,
    /// Write the file to the server
    #[value(name = "w")]
    Write,
}

#[derive(Parser, Debug)]
#[command(name = "tftp")]
#[command(about = "A lockstep TFTP client", long_about = None)]
#[command(styles = STYLES)]
pub struct Cli {
    /// Server ip
    pub server_ip: IpAddr,

    /// Server port
    pub server_port: u16,

    /// Remote file name (also the local file name unless --local is given)
    pub filename: String,

    /// r = read from server, w = write to server
    #[arg(value_enum)]
    pub mode: TransferMode,

    /// Local file path
    #[arg(short, long)]
    pub local: Option<PathBuf>,

    /// Timeout (ms)
    #[arg(short, long, default_value_t = DEF_TIMEOUT_MS)]
    pub timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = MAX_RETRY_COUNT)]
    pub retry: u8,

    /// Follow the port the server answers from instead of the one given
    #[arg(long)]
    pub learn_peer: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser, Debug)]
#[command(name = "tftpd")]
#[command(about = "A lockstep TFTP server", long_about = None)]
#[command(styles = STYLES)]
pub struct ServerCli {
    /// Listen ip
    #[arg(short, long, default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Listen Port
    #[arg(short, long, default_value_t = 69)]
    pub port: u16,

    /// Work directory
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Timeout (ms)
    #[arg(short, long, default_value_t = DEF_TIMEOUT_MS)]
    pub timeout: u64,

    /// Max retries
    #[arg(short, long, default_value_t = MAX_RETRY_COUNT)]
    pub retry: u8,

    /// Reject write requests
    #[arg(long)]
    pub read_only: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Path the transferred file is read from or written to locally.
    pub fn local_path(&self) -> PathBuf {
        self.local
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.filename))
    }
}

/// Maps `-v` occurrences to a log level filter.
pub fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}
