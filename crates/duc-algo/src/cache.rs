//! Disk cache for per-outage link matrices.
//!
//! Layout: `<root>/<instance>/<zone>/<line>.json`, one matrix per file.
//! Writes go through a temporary sibling and an atomic rename, so readers
//! never observe a half-written file. Only rank 0 writes; every rank
//! reads. Any read or write failure degrades to a cache miss and the
//! matrix is recomputed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use duc_core::{LineId, ZoneId};

/// Cache of link matrices keyed by (instance name, zone, outage line).
#[derive(Debug, Clone)]
pub struct LinkCache {
    root: PathBuf,
}

impl LinkCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, instance: &str, zone: ZoneId, line: LineId) -> PathBuf {
        self.root
            .join(instance)
            .join(zone.value().to_string())
            .join(format!("{}.json", line.value()))
    }

    /// Fetch a cached matrix; any failure is a miss.
    pub fn read(&self, instance: &str, zone: ZoneId, line: LineId) -> Option<Vec<Vec<f64>>> {
        let path = self.entry_path(instance, zone, line);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(link) => {
                debug!(path = %path.display(), "link cache hit");
                Some(link)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "corrupt cache entry, recomputing");
                None
            }
        }
    }

    /// Store a matrix; failures are logged and otherwise ignored.
    pub fn write(&self, instance: &str, zone: ZoneId, line: LineId, link: &[Vec<f64>]) {
        let path = self.entry_path(instance, zone, line);
        if let Err(err) = self.write_atomic(&path, link) {
            warn!(path = %path.display(), %err, "link cache write failed");
        }
    }

    fn write_atomic(&self, path: &Path, link: &[Vec<f64>]) -> std::io::Result<()> {
        let parent = path.parent().expect("cache entries always have a parent");
        fs::create_dir_all(parent)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(link)?)?;
        fs::rename(&tmp, path)
    }
}
