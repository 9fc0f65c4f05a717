//! Original payload cache
//!
//! In tracking mode the session keeps the payload of every top-level record
//! it is about to overwrite for the first time. Payloads live in a directory
//! tree mirroring catalog paths under the cache directory, and `keeplist.dat`
//! remembers the record digest (bytes 12..44 of the record) last seen or
//! written for each tracked path:
//!
//! ```text
//! ./Bundles2/Folders/data.bundle.bin<TAB>9f86d081884c7d65...
//! ```
//!
//! A record whose on-disk digest no longer matches the keeplist was replaced
//! by something other than this engine (a game patch, for instance) and its
//! new payload becomes the original.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Result, StorageError};

/// Keeplist file name inside the cache directory
pub const KEEPLIST_FILE: &str = "keeplist.dat";

/// Shadow tree and keeplist for one cache directory
#[derive(Debug)]
pub struct ShadowCache {
    root: PathBuf,
    keeplist: BTreeMap<String, String>,
    checked: HashSet<String>,
}

impl ShadowCache {
    /// Open the cache at `root`, creating the directory and an empty
    /// keeplist when missing
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let keeplist_path = root.join(KEEPLIST_FILE);
        let mut keeplist = BTreeMap::new();
        if keeplist_path.exists() {
            let text = fs::read_to_string(&keeplist_path)?;
            for (number, line) in text.lines().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let (path, digest) = line.split_once('\t').ok_or_else(|| {
                    StorageError::Sidecar(format!(
                        "{KEEPLIST_FILE} line {}: expected path and digest",
                        number + 1
                    ))
                })?;
                keeplist.insert(path.to_string(), digest.to_string());
            }
        } else {
            fs::write(&keeplist_path, "")?;
        }

        debug!("Shadow cache at {:?} tracks {} paths", root, keeplist.len());
        Ok(Self {
            root,
            keeplist,
            checked: HashSet::new(),
        })
    }

    /// Cache directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` has a keeplist digest
    pub fn is_tracked(&self, path: &str) -> bool {
        self.keeplist.contains_key(path)
    }

    /// Keeplist digest of `path`, as lowercase hex
    pub fn digest(&self, path: &str) -> Option<&str> {
        self.keeplist.get(path).map(String::as_str)
    }

    /// Remember `digest` as the last known digest of `path`
    pub fn set_digest(&mut self, path: &str, digest: &[u8]) {
        self.keeplist.insert(path.to_string(), hex::encode(digest));
    }

    /// Whether the record at `path` with on-disk `digest` differs from what
    /// the keeplist remembers (untracked paths always differ)
    pub fn differs(&self, path: &str, digest: &[u8]) -> bool {
        self.digest(path) != Some(hex::encode(digest).as_str())
    }

    /// Mark `path` as checked for this session; `false` if it already was
    pub fn mark_checked(&mut self, path: &str) -> bool {
        self.checked.insert(path.to_string())
    }

    /// File holding the shadowed payload of `path`
    pub fn payload_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !matches!(*part, "" | "." | ".."))
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Whether a payload is shadowed for `path`
    pub fn has_payload(&self, path: &str) -> bool {
        self.payload_path(path).is_file()
    }

    /// Shadow `payload` as the original of `path`
    pub fn store(&self, path: &str, payload: &[u8]) -> Result<()> {
        let target = self.payload_path(path);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&target, payload)?;
        info!("Shadowed {} bytes of {} to {:?}", payload.len(), path, target);
        Ok(())
    }

    /// Read the shadowed payload of `path`, at most `limit` bytes
    pub fn load(&self, path: &str, limit: Option<u64>) -> Result<Option<Vec<u8>>> {
        let target = self.payload_path(path);
        if !target.is_file() {
            return Ok(None);
        }
        let file = fs::File::open(&target)?;
        let mut data = Vec::new();
        match limit {
            Some(limit) => file.take(limit).read_to_end(&mut data)?,
            None => (&file).read_to_end(&mut data)?,
        };
        Ok(Some(data))
    }

    /// Write the keeplist back to disk
    pub fn save(&self) -> Result<()> {
        let mut out = String::new();
        for (path, digest) in &self.keeplist {
            out.push_str(path);
            out.push('\t');
            out.push_str(digest);
            out.push('\n');
        }
        fs::write(self.root.join(KEEPLIST_FILE), out)?;
        debug!("Saved keeplist with {} paths", self.keeplist.len());
        Ok(())
    }
}
