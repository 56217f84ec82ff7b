// Reads parsed-document snapshots handed over as JSON
use crate::{model::Snapshot, Error, Result};
#[cfg(feature = "mmap")]
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

pub struct SnapshotLoader {
    mmap: bool,
}

impl Default for SnapshotLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotLoader {
    pub fn new() -> Self {
        Self {
            mmap: cfg!(feature = "mmap"),
        }
    }

    /// Only takes effect when built with the `mmap` feature.
    pub fn with_mmap(mut self, mmap: bool) -> Self {
        self.mmap = mmap && cfg!(feature = "mmap");
        self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Snapshot> {
        let path = path.as_ref();
        let file = File::open(path)?;

        if self.mmap {
            #[cfg(feature = "mmap")]
            {
                // SAFETY: the map is read-only and dropped before this call returns
                let map = unsafe { Mmap::map(&file)? };
                return self.parse_bytes(&map);
            }
        }

        let content = std::io::read_to_string(file)?;
        debug!(path = %path.display(), bytes = content.len(), "Read snapshot");
        self.parse_bytes(content.as_bytes())
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<Snapshot> {
        // Skip BOM if present
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

        let snapshot: Snapshot = serde_json::from_slice(data)
            .map_err(|e| Error::Parse(format!("malformed snapshot: {}", e)))?;
        debug!(
            document = %snapshot.document_id,
            elements = snapshot.elements.len(),
            facts = snapshot.facts.len(),
            "Parsed snapshot"
        );
        Ok(snapshot)
    }
}
