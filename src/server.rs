//! Server side: accept loop and per-connection command dispatch.
//!
//! One connection is served at a time. The dispatcher answers `request`
//! with the inventory, `filereq` with a file transfer, and leaves the
//! connection on `finish` or a read failure; malformed or unknown frames
//! are silently ignored and the next message is awaited. The accept loop
//! never exits, so a broken connection cannot take the process down.

use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use tokio::net::TcpListener;

use crate::checksum::{self, Fingerprint};
use crate::connection::Connection;
use crate::inventory::{self, slash_path, Inventory};
use crate::protocol::command;
use crate::update_hook::{self, UpdateHook};

pub enum ServerMode {
    /// MD5 fingerprints over `root`, with update hooks on rebuild.
    ContentHash,
    /// Modification-time fingerprints over a directory named per request.
    Timestamp,
}

pub struct ServerConfig {
    pub mode: ServerMode,
    pub root: PathBuf,
    pub hooks: Vec<UpdateHook>,
    pub verbose: bool,
}

/// Serves connections forever. In content-hash mode the full inventory is
/// built (and `files.json` persisted) once before the first accept.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> Result<()> {
    let mut inventory = match config.mode {
        ServerMode::ContentHash => rebuild_inventory(&config.root, &[], &config.hooks)?,
        ServerMode::Timestamp => Inventory::default(),
    };
    loop {
        let (stream, peer) = listener.accept().await?;
        if config.verbose {
            println!("accepted {peer}");
        }
        let conn = Connection::new(stream);
        if let Err(err) = handle_connection(conn, &config, &mut inventory).await {
            eprintln!("connection ended with error: {err:#}");
        }
    }
}

async fn handle_connection(
    mut conn: Connection,
    config: &ServerConfig,
    inventory: &mut Inventory,
) -> Result<()> {
    // Content-hash mode always serves `root`; time-stamp mode adopts the
    // directory named in the request.
    let mut sync_dir = config.root.clone();
    loop {
        let msg = conn.recv_message().await;
        if msg.is_error() {
            return Ok(());
        }
        match msg.command.as_str() {
            command::REQUEST => {
                if msg.args.first().map(String::as_str) != Some(command::FILELIST) {
                    continue;
                }
                match config.mode {
                    ServerMode::ContentHash => {
                        if msg.args.len() > 1 {
                            let names: Vec<String> = if msg.args[1] == "--" {
                                Vec::new()
                            } else {
                                msg.args[1..].to_vec()
                            };
                            *inventory = rebuild_inventory(&config.root, &names, &config.hooks)?;
                        }
                    }
                    ServerMode::Timestamp => {
                        // A request without a source directory assumes the
                        // content-hash convention; drop it.
                        let Some(dir) = msg
                            .args
                            .get(1)
                            .filter(|d| !d.is_empty() && d.as_str() != "--")
                        else {
                            continue;
                        };
                        let exclude = match msg.args.get(2).filter(|s| !s.is_empty()) {
                            Some(pattern) => match Regex::new(pattern.as_str()) {
                                Ok(re) => Some(re),
                                Err(err) => {
                                    eprintln!("ignoring request with bad pattern: {err}");
                                    continue;
                                }
                            },
                            None => None,
                        };
                        sync_dir = PathBuf::from(dir);
                        let listing = inventory::scan(
                            &sync_dir,
                            Fingerprint::ModTime,
                            exclude.as_ref(),
                            None,
                        )?;
                        *inventory = Inventory::from_entries(listing);
                    }
                }
                let mut pairs = Vec::with_capacity(inventory.filelist.len() * 2);
                for entry in &inventory.filelist {
                    pairs.push(entry.file.as_str());
                    pairs.push(entry.hash.as_str());
                }
                let done = conn.send(command::FILELIST, &pairs)?;
                let _ = done.await;
            }
            command::FILEREQ => {
                let Some(file) = msg.args.first() else {
                    continue;
                };
                let path = sync_dir.join(file);
                if config.verbose {
                    println!("request: {}", path.display());
                }
                let done = conn.send_file(&path).await?;
                let _ = done.await;
            }
            command::FINISH => return Ok(()),
            _ => {}
        }
    }
}

/// Walks `root`, merges the result into the persisted inventory, runs
/// update hooks for new or changed entries, rehashes after each hook
/// exits, and rewrites `files.json`. An empty `only_names` hashes the
/// whole tree; otherwise hashing is limited to the named basenames.
///
/// Blocks until every spawned hook has exited, like the rest of the
/// dispatch loop this runs on the connection's thread.
pub fn rebuild_inventory(
    root: &Path,
    only_names: &[String],
    hooks: &[UpdateHook],
) -> Result<Inventory> {
    let mut inventory = Inventory::load(root)?;
    let names = (!only_names.is_empty()).then_some(only_names);
    let scanned = inventory::scan(root, Fingerprint::ContentHash, None, names)?;

    struct RunningHook {
        child: std::process::Child,
        file: String,
        path: PathBuf,
    }

    let mut running = Vec::new();
    for (file, hash) in scanned {
        if !inventory.upsert(&file, &hash) {
            continue;
        }
        let path = root.join(&file);
        if let Some(tokens) = update_hook::find_command(hooks, &slash_path(&path)) {
            match update_hook::spawn(&tokens) {
                Ok(child) => running.push(RunningHook { child, file, path }),
                Err(err) => eprintln!("update hook failed for {file}: {err:#}"),
            }
        }
    }

    // The hook may have rewritten the file; its hash is taken afterwards.
    for mut hook in running {
        if let Err(err) = hook.child.wait() {
            eprintln!("waiting for hook on {}: {err}", hook.file);
            continue;
        }
        let hash = checksum::md5_file(&hook.path)?;
        println!("update hash: {} -> {hash}", hook.path.display());
        inventory.upsert(&hook.file, &hash);
    }

    inventory.save(root)?;
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rebuild_collects_and_persists() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.bin"), "bb").unwrap();

        let inv = rebuild_inventory(dir.path(), &[], &[]).unwrap();
        assert_eq!(inv.filelist.len(), 2);
        assert_eq!(
            inv.get("a.txt").unwrap().hash,
            "b1946ac92492d2347c6235b4d2611184"
        );

        // The persisted copy matches, and the next rebuild reuses it.
        let reloaded = Inventory::load(dir.path()).unwrap();
        assert_eq!(reloaded.filelist, inv.filelist);
    }

    #[test]
    fn rebuild_keeps_entries_for_vanished_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        rebuild_inventory(dir.path(), &[], &[]).unwrap();

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        let inv = rebuild_inventory(dir.path(), &[], &[]).unwrap();
        assert!(inv.get("a.txt").is_some());
        assert!(inv.get("b.txt").is_some());
    }

    #[test]
    fn filename_filter_limits_hashing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.txt"), "x").unwrap();
        std::fs::write(dir.path().join("y.txt"), "y").unwrap();

        let names = vec!["x.txt".to_string()];
        let inv = rebuild_inventory(dir.path(), &names, &[]).unwrap();
        assert!(inv.get("x.txt").is_some());
        assert!(inv.get("y.txt").is_none());
    }

    #[test]
    fn hook_runs_and_hash_reflects_post_hook_contents() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("img.png");
        std::fs::write(&img, "png-bytes").unwrap();

        // The hook rewrites the file; the stored hash must match the
        // post-hook snapshot, not the one taken during the walk.
        let marker = dir.path().join("rewritten.dat");
        let settings = dir.path().join(update_hook::SETTINGS_FILE);
        std::fs::write(
            &settings,
            format!(
                "[[update]]\npattern = \"\\\\.png$\"\ncommand = \"cp {} $in\"\n",
                marker.display()
            ),
        )
        .unwrap();
        std::fs::write(&marker, "replaced-by-hook").unwrap();
        let hooks = update_hook::load(&settings).unwrap();

        let inv = rebuild_inventory(dir.path(), &[], &hooks).unwrap();
        let expected = checksum::md5_file(&marker).unwrap();
        assert_eq!(inv.get("img.png").unwrap().hash, expected);
        assert_eq!(std::fs::read(&img).unwrap(), b"replaced-by-hook");
    }

    #[test]
    fn unchanged_files_do_not_refire_hooks() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("img.png");
        std::fs::write(&img, "stable").unwrap();

        let counter = dir.path().join("fired");
        let settings = dir.path().join(update_hook::SETTINGS_FILE);
        std::fs::write(
            &settings,
            format!(
                "[[update]]\npattern = \"\\\\.png$\"\ncommand = \"touch {}\"\n",
                counter.display()
            ),
        )
        .unwrap();
        let hooks = update_hook::load(&settings).unwrap();

        rebuild_inventory(dir.path(), &[], &hooks).unwrap();
        assert!(counter.exists());
        std::fs::remove_file(&counter).unwrap();

        // Second rebuild: nothing changed, the hook stays quiet.
        rebuild_inventory(dir.path(), &[], &hooks).unwrap();
        assert!(!counter.exists());
    }
}
