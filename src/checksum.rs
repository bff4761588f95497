//! File fingerprints shared by the server, client, and local mirror.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::Result;

/// Fingerprint scheme for a connection or sync run. Both ends must agree;
/// mixing schemes on one exchange compares apples to epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    /// MD5 over the file contents, 32 lowercase hex digits.
    ContentHash,
    /// Last-write time, decimal seconds since the epoch.
    ModTime,
}

impl Fingerprint {
    pub fn of(self, path: &Path) -> Result<String> {
        match self {
            Fingerprint::ContentHash => md5_file(path),
            Fingerprint::ModTime => mtime_fingerprint(path),
        }
    }
}

/// MD5 of the file contents, streamed in 8 KiB chunks.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

pub fn mtime_fingerprint(path: &Path) -> Result<String> {
    Ok(mtime_seconds(path)?.to_string())
}

/// Seconds since the epoch of the file's last write; pre-epoch clamps to 0.
pub fn mtime_seconds(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn md5_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello\n").unwrap();
        assert_eq!(
            md5_file(&path).unwrap(),
            "b1946ac92492d2347c6235b4d2611184"
        );
    }

    #[test]
    fn md5_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, "").unwrap();
        assert_eq!(
            md5_file(&path).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn md5_spans_chunk_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big");
        std::fs::write(&path, vec![b'z'; 8 * 1024 + 13]).unwrap();
        let digest = md5_file(&path).unwrap();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn mtime_is_decimal_seconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stamped");
        std::fs::write(&path, "x").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1000, 0)).unwrap();
        assert_eq!(mtime_fingerprint(&path).unwrap(), "1000");
        assert_eq!(
            Fingerprint::ModTime.of(&path).unwrap(),
            mtime_fingerprint(&path).unwrap()
        );
    }
}
