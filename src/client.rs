//! Client session: request the remote listing, reconcile, pull, persist.
//!
//! Pulls are strictly sequential over the one connection - the next
//! `filereq` goes out only after the previous file has been fully received.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;

use crate::connection::Connection;
use crate::inventory::{slash_path, Inventory};
use crate::protocol::{command, PORT};
use crate::reconcile;

pub struct ClientOptions {
    pub hostname: String,
    pub port: u16,
    /// Destination root for pulled files and `files.json`.
    pub output: PathBuf,
    /// Content-hash mode: ask the server to rebuild its listing first.
    pub update: bool,
    /// Time-stamp mode: directory the server should advertise. Selects the
    /// scheme for the whole session.
    pub request: Option<PathBuf>,
    /// Time-stamp mode: exclusion regex forwarded to the server.
    pub without: Option<String>,
    pub verbose: bool,
}

impl ClientOptions {
    pub fn new(hostname: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            hostname: hostname.into(),
            port: PORT,
            output: output.into(),
            update: false,
            request: None,
            without: None,
            verbose: false,
        }
    }
}

/// Runs one full synchronization exchange. Errors out (non-zero exit in the
/// binary) when the connection fails or the exchange dies midway.
pub async fn run(opts: &ClientOptions) -> Result<()> {
    let stream = TcpStream::connect((opts.hostname.as_str(), opts.port))
        .await
        .with_context(|| format!("connecting to {}:{}", opts.hostname, opts.port))?;
    let mut conn = Connection::new(stream);

    let request: Vec<String> = match &opts.request {
        Some(dir) => vec![
            command::FILELIST.to_string(),
            slash_path(dir),
            opts.without.clone().unwrap_or_default(),
        ],
        None if opts.update => vec![command::FILELIST.to_string(), "--".to_string()],
        None => vec![command::FILELIST.to_string()],
    };
    let done = conn.send(command::REQUEST, &request)?;
    if !done.await.unwrap_or(false) {
        bail!("sending the listing request failed");
    }

    let reply = conn.recv_message().await;
    if reply.command != command::FILELIST {
        bail!("listing request answered with \"{}\"", reply.command);
    }
    let remote = parse_filelist(&reply.args);
    if opts.verbose {
        println!("remote listing: {} files", remote.len());
    }

    let pulls = match &opts.request {
        Some(_) => reconcile::plan_timestamp(&remote, &opts.output),
        None => {
            let local = Inventory::load(&opts.output)?;
            reconcile::plan_content_hash(&remote, &local, &opts.output)
        }
    };

    if opts.verbose {
        let pulled: HashSet<&String> = pulls.iter().collect();
        for (file, _) in &remote {
            if !pulled.contains(file) {
                println!("skip: {file}");
            }
        }
    }

    for file in &pulls {
        let done = conn.send(command::FILEREQ, &[file.as_str()])?;
        if !done.await.unwrap_or(false) {
            bail!("requesting {file} failed");
        }
        let dest = opts.output.join(file);
        conn.recv_file(&dest)
            .await
            .with_context(|| format!("receiving {file}"))?;
        if opts.verbose {
            println!("save to: {}", dest.display());
        }
    }

    Inventory::from_entries(remote).save(&opts.output)?;
    let done = conn.send(command::FINISH, &["no error"])?;
    let _ = done.await;

    println!("Finished ({} pulled)", pulls.len());
    Ok(())
}

/// The `filelist` reply alternates file and fingerprint strings; a missing
/// trailing fingerprint decodes as empty.
pub fn parse_filelist(args: &[String]) -> Vec<(String, String)> {
    args.chunks(2)
        .map(|pair| {
            let file = pair[0].clone();
            let hash = pair.get(1).cloned().unwrap_or_default();
            (file, hash)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filelist_pairs_decode_in_order() {
        let args: Vec<String> = ["a.txt", "h1", "sub/b.bin", "h2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            parse_filelist(&args),
            vec![
                ("a.txt".to_string(), "h1".to_string()),
                ("sub/b.bin".to_string(), "h2".to_string()),
            ]
        );
    }

    #[test]
    fn odd_tail_gets_empty_fingerprint() {
        let args: Vec<String> = ["only.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            parse_filelist(&args),
            vec![("only.txt".to_string(), String::new())]
        );
    }

    #[test]
    fn empty_reply_is_empty_listing() {
        assert!(parse_filelist(&[]).is_empty());
    }
}
