use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use regex::Regex;

use dirsync::cli::parse_regex;
use dirsync::client::{self, ClientOptions};
use dirsync::protocol::PORT;

/// Directory synchronize client
#[derive(Parser, Debug)]
#[command(about = "directory synchronize client")]
struct Args {
    /// Server hostname
    #[arg(default_value = "localhost")]
    hostname: String,

    /// Output path
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Ask the server to rebuild its file list first
    #[arg(short, long)]
    update: bool,

    /// Time-stamp mode: directory the server should advertise
    #[arg(long)]
    request: Option<PathBuf>,

    /// Time-stamp mode: exclusion pattern applied on the server
    #[arg(long, value_parser = parse_regex)]
    without: Option<Regex>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let opts = ClientOptions {
        hostname: args.hostname,
        port: PORT,
        output: args.output,
        update: args.update,
        request: args.request,
        without: args.without.map(|re| re.as_str().to_string()),
        verbose: args.verbose,
    };
    client::run(&opts).await
}
