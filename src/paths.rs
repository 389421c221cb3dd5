//! Locations of the on-disk artifacts of one index.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The six files making up an index, all derived from one base path.
///
/// - `.data`: encoded records, `D + 1` u64 each (values, then ordinal)
/// - `.disk`: one [`RecordLocation`][crate::shim::RecordLocation] per ordinal
/// - `.keys`: records grouped into padded leaf blocks
/// - `.tree`: tree node slots
/// - `.range`: one bounding range per leaf block
/// - `.meta`: field names and key types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexPaths {
    base: PathBuf,
}

impl IndexPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory that holds every artifact.
    pub fn dir(&self) -> &Path {
        match self.base.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn data(&self) -> PathBuf {
        self.with_extension("data")
    }

    pub fn disk(&self) -> PathBuf {
        self.with_extension("disk")
    }

    pub fn keys(&self) -> PathBuf {
        self.with_extension("keys")
    }

    pub fn tree(&self) -> PathBuf {
        self.with_extension("tree")
    }

    pub fn range(&self) -> PathBuf {
        self.with_extension("range")
    }

    pub fn meta(&self) -> PathBuf {
        self.with_extension("meta")
    }

    /// All artifact paths.
    pub fn all(&self) -> [PathBuf; 6] {
        [
            self.data(),
            self.disk(),
            self.keys(),
            self.tree(),
            self.range(),
            self.meta(),
        ]
    }

    /// Remove every artifact that exists.
    pub fn remove_all(&self) -> Result<()> {
        for path in self.all() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // Appends rather than replaces, since base names such as `trips.pickup_2d` contain dots.
    fn with_extension(&self, ext: &str) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(".");
        name.push(ext);
        name.into()
    }
}
