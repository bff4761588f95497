use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use tokio::net::TcpListener;

use dirsync::protocol::PORT;
use dirsync::server::{self, ServerConfig, ServerMode};
use dirsync::update_hook;

/// Directory synchronize server
#[derive(Parser, Debug)]
#[command(about = "directory synchronize server")]
struct Args {
    /// Directory to serve
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Advertise modification times instead of content hashes
    #[arg(short, long)]
    time: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    if !args.path.is_dir() {
        bail!("\"PATH\"<{}> has to be a directory", args.path.display());
    }

    let (mode, hooks) = if args.time {
        (ServerMode::Timestamp, Vec::new())
    } else {
        (
            ServerMode::ContentHash,
            update_hook::load(Path::new(update_hook::SETTINGS_FILE))?,
        )
    };

    let listener = TcpListener::bind(("0.0.0.0", PORT)).await?;
    if args.verbose {
        println!("listening on {}", listener.local_addr()?);
    }
    server::serve(
        listener,
        ServerConfig {
            mode,
            root: args.path,
            hooks,
            verbose: args.verbose,
        },
    )
    .await
}
