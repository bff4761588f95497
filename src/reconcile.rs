//! Pull planning: turns a remote listing and the local state into the
//! ordered list of files to fetch.

use std::path::Path;

use crate::checksum::mtime_seconds;
use crate::inventory::Inventory;

/// Content-hash rule: pull when the file is unknown locally, the recorded
/// hash differs, or the file has vanished from disk since it was recorded.
pub fn plan_content_hash(
    remote: &[(String, String)],
    local: &Inventory,
    dest_root: &Path,
) -> Vec<String> {
    let mut pulls = Vec::new();
    for (file, hash) in remote {
        let pull = match local.get(file) {
            None => true,
            Some(entry) => !dest_root.join(file).exists() || entry.hash != *hash,
        };
        if pull {
            pulls.push(file.clone());
        }
    }
    pulls
}

/// Time-stamp rule: pull when the destination is missing or strictly older
/// than the remote stamp. An unparseable stamp only pulls a missing file.
pub fn plan_timestamp(remote: &[(String, String)], dest_root: &Path) -> Vec<String> {
    let mut pulls = Vec::new();
    for (file, stamp) in remote {
        let dest = dest_root.join(file);
        let pull = match mtime_seconds(&dest) {
            Err(_) => true,
            Ok(local_secs) => stamp.parse::<u64>().map_or(false, |remote_secs| {
                remote_secs > local_secs
            }),
        };
        if pull {
            pulls.push(file.clone());
        }
    }
    pulls
}
