//! Local mirror: a two-stage pipeline over one shared work queue.
//!
//! The producer walks the source tree and enqueues one check task per
//! regular file. Workers turn a check into a copy task when the index or
//! the destination says the file is out of date; the outstanding-work
//! counter follows the file from check to copy, so the producer's drain
//! wait is exact. Distinct files never share a destination path, which is
//! what lets the workers run without per-file locking.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use parking_lot::{Condvar, Mutex};
use regex::Regex;
use walkdir::WalkDir;

use crate::checksum::Fingerprint;
use crate::index::HashIndex;
use crate::inventory::slash_path;
use crate::logger::SyncLogger;

pub struct SyncOptions {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub filedb: PathBuf,
    /// Worker threads; zero or negative means `max(1, cores / 2)`.
    pub jobs: i64,
    pub use_timestamp: bool,
    pub check_only: bool,
    pub verbose: bool,
    pub exclude: Option<Regex>,
}

#[derive(Debug, Default)]
pub struct SyncStats {
    pub checked: u64,
    pub copied: u64,
    pub errors: u64,
}

enum Task {
    Check {
        src: PathBuf,
    },
    Copy {
        src: PathBuf,
        dst: PathBuf,
        fingerprint: String,
    },
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    available: Condvar,
    pending: AtomicUsize,
    shutdown: AtomicBool,

    src_root: String,
    dst_root: PathBuf,
    scheme: Fingerprint,
    check_only: bool,
    verbose: bool,
    index: HashIndex,
    logger: Box<dyn SyncLogger>,
    copied: AtomicU64,
    errors: AtomicU64,
}

pub fn worker_count(jobs: i64) -> usize {
    if jobs > 0 {
        return jobs as usize;
    }
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    (cores / 2).max(1)
}

/// Runs one mirror pass and returns its statistics. Fails fast when either
/// directory is missing or src and dst resolve to the same place.
pub fn run(opts: &SyncOptions, logger: Box<dyn SyncLogger>) -> Result<SyncStats> {
    let src = std::fs::canonicalize(&opts.src)
        .with_context(|| format!("source directory {}", opts.src.display()))?;
    let dst = std::fs::canonicalize(&opts.dst)
        .with_context(|| format!("destination directory {}", opts.dst.display()))?;
    if !src.is_dir() {
        bail!("source {} is not a directory", src.display());
    }
    if !dst.is_dir() {
        bail!("destination {} is not a directory", dst.display());
    }
    if src == dst {
        bail!("source and destination are the same directory");
    }

    let started = std::time::Instant::now();
    let scheme = if opts.use_timestamp {
        Fingerprint::ModTime
    } else {
        Fingerprint::ContentHash
    };
    let index = HashIndex::open(&opts.filedb)?;

    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::new()),
        available: Condvar::new(),
        pending: AtomicUsize::new(0),
        shutdown: AtomicBool::new(false),
        src_root: slash_path(&src),
        dst_root: dst.clone(),
        scheme,
        check_only: opts.check_only,
        verbose: opts.verbose,
        index,
        logger,
        copied: AtomicU64::new(0),
        errors: AtomicU64::new(0),
    });

    shared.logger.start(&src, &dst);

    let workers: Vec<_> = (0..worker_count(opts.jobs))
        .map(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker(&shared))
        })
        .collect();

    // Produce one check task per regular file.
    let mut checked = 0u64;
    for entry in WalkDir::new(&src)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(re) = &opts.exclude {
            if re.is_match(&slash_path(entry.path())) {
                continue;
            }
        }
        checked += 1;
        shared.pending.fetch_add(1, Ordering::AcqRel);
        {
            let mut queue = shared.queue.lock();
            queue.push_back(Task::Check {
                src: entry.path().to_path_buf(),
            });
        }
        shared.available.notify_one();
    }

    // Wait until the queue is drained and every task has completed.
    {
        let mut queue = shared.queue.lock();
        while shared.pending.load(Ordering::Acquire) > 0 || !queue.is_empty() {
            shared.available.wait(&mut queue);
        }
    }

    shared.shutdown.store(true, Ordering::Release);
    shared.available.notify_all();
    for handle in workers {
        let _ = handle.join();
    }

    let stats = SyncStats {
        checked,
        copied: shared.copied.load(Ordering::Acquire),
        errors: shared.errors.load(Ordering::Acquire),
    };
    shared
        .logger
        .done(stats.checked, stats.copied, started.elapsed().as_secs_f64());
    Ok(stats)
}

fn worker(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };
        let Some(task) = task else { return };

        match task {
            Task::Check { src } => match check_file(shared, &src) {
                Ok(Some(copy)) => {
                    // The counter rides along to the copy task.
                    {
                        let mut queue = shared.queue.lock();
                        queue.push_back(copy);
                    }
                    shared.available.notify_one();
                }
                Ok(None) => complete_one(shared),
                Err(err) => {
                    shared.errors.fetch_add(1, Ordering::Relaxed);
                    shared.logger.error("check", &src, &format!("{err:#}"));
                    eprintln!("check failed for {}: {err:#}", src.display());
                    complete_one(shared);
                }
            },
            Task::Copy {
                src,
                dst,
                fingerprint,
            } => {
                if let Err(err) = copy_file(shared, &src, &dst, &fingerprint) {
                    shared.errors.fetch_add(1, Ordering::Relaxed);
                    shared.logger.error("copy", &src, &format!("{err:#}"));
                    eprintln!("copy failed for {}: {err:#}", src.display());
                }
                complete_one(shared);
            }
        }
    }
}

fn complete_one(shared: &Shared) {
    // Pair the decrement with the condvar so the producer's wait cannot
    // miss the final wakeup.
    let _queue = shared.queue.lock();
    shared.pending.fetch_sub(1, Ordering::AcqRel);
    shared.available.notify_all();
}

fn check_file(shared: &Shared, src: &Path) -> Result<Option<Task>> {
    let src_key = slash_path(src);
    let fingerprint = shared.scheme.of(src)?;

    let mut update = match shared.index.get(&src_key)? {
        Some(recorded) => recorded != fingerprint,
        None => true,
    };
    if update {
        shared.index.put(&src_key, &fingerprint)?;
    }

    let dst = destination_for(&src_key, &shared.src_root, &shared.dst_root);
    if !update {
        update = !dst.exists();
    }
    if !update {
        return Ok(None);
    }
    if shared.check_only {
        println!("[Check]: {}", dst.display());
        return Ok(None);
    }
    if shared.verbose {
        println!("[Update]: {}", dst.display());
    }
    Ok(Some(Task::Copy {
        src: src.to_path_buf(),
        dst,
        fingerprint,
    }))
}

fn copy_file(shared: &Shared, src: &Path, dst: &Path, fingerprint: &str) -> Result<()> {
    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    if dst.exists() {
        std::fs::remove_file(dst)?;
    }
    let bytes = std::fs::copy(src, dst)
        .with_context(|| format!("copying to {}", dst.display()))?;
    shared.index.put(&slash_path(src), fingerprint)?;
    shared.copied.fetch_add(1, Ordering::Relaxed);
    shared.logger.copy_done(src, dst, bytes);
    Ok(())
}

/// Source path → destination path by prefix substitution of the source
/// root's string.
fn destination_for(src_key: &str, src_root: &str, dst_root: &Path) -> PathBuf {
    let rel = src_key
        .strip_prefix(src_root)
        .unwrap_or(src_key)
        .trim_start_matches('/');
    dst_root.join(rel)
}
