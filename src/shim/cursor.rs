use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use serde_json::Value as JsonValue;

use crate::engine::Engine;
use crate::error::{KdError, Result};
use crate::shim::predicate::parse_predicate;
use crate::shim::{IndexMeta, RecordLocation};

/// Where a [`KdCursor`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No predicate applied yet.
    Unseeked,
    /// Positioned on a result.
    Seeked,
    /// Past the last result.
    Eof,
}

enum Locations {
    Mapped(Mmap),
    Empty,
}

impl Locations {
    fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Locations::Empty);
        }
        // SAFETY: index files are immutable once built.
        let map = unsafe { Mmap::map(&file)? };
        bytemuck::try_cast_slice::<u8, RecordLocation>(&map[..])
            .map_err(|e| KdError::Format(format!("{}: {}", path.display(), e)))?;
        Ok(Locations::Mapped(map))
    }

    fn as_slice(&self) -> &[RecordLocation] {
        match self {
            Locations::Mapped(map) => bytemuck::cast_slice(&map[..]),
            Locations::Empty => &[],
        }
    }
}

/// Walks the records matching a predicate, in ordinal order.
///
/// ```ignore
/// let mut cursor = index.new_cursor()?;
/// cursor.seek(&json!({"time": {"$gte": 100}}))?;
/// while let Some(location) = cursor.value() {
///     // ...
///     cursor.advance();
/// }
/// ```
pub struct KdCursor {
    engine: Arc<Engine>,
    meta: IndexMeta,
    locations: Locations,
    results: Vec<u64>,
    position: usize,
    state: CursorState,
}

impl std::fmt::Debug for KdCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KdCursor")
            .field("index", &self.engine.paths().base())
            .field("results", &self.results.len())
            .field("position", &self.position)
            .field("state", &self.state)
            .finish()
    }
}

impl KdCursor {
    /// A cursor over the index served by `engine`, reading locations from `disk`.
    pub fn open(engine: Arc<Engine>, meta: IndexMeta, disk: &Path) -> Result<Self> {
        if meta.dims() != engine.dims() {
            return Err(KdError::Format(format!(
                "meta declares {} dimensions, index has {}",
                meta.dims(),
                engine.dims()
            )));
        }
        let locations = Locations::map(disk)?;
        Ok(Self {
            engine,
            meta,
            locations,
            results: vec![],
            position: 0,
            state: CursorState::Unseeked,
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// Run `predicate` and position the cursor on the first match.
    ///
    /// Every `$or` branch runs as its own query; a record matching several branches is returned
    /// once.
    pub fn seek(&mut self, predicate: &JsonValue) -> Result<()> {
        let queries = parse_predicate(&self.meta, predicate)?;
        // start every branch before waiting on any of them
        let pending = queries
            .into_iter()
            .map(|q| self.engine.submit(q))
            .collect::<Result<Vec<_>>>()?;
        let mut results = vec![];
        for p in pending {
            results.extend(self.engine.collect(p)?);
        }
        results.sort_unstable();
        results.dedup();

        let known = self.locations.as_slice().len() as u64;
        if let Some(&last) = results.last() {
            if last >= known {
                return Err(KdError::Format(format!(
                    "ordinal {} has no location, the index holds {}",
                    last, known
                )));
            }
        }

        tracing::debug!(results = results.len(), "cursor seeked");
        self.state = if results.is_empty() {
            CursorState::Eof
        } else {
            CursorState::Seeked
        };
        self.results = results;
        self.position = 0;
        Ok(())
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// True unless the cursor stands on a result.
    pub fn is_eof(&self) -> bool {
        self.state != CursorState::Seeked
    }

    /// Number of results of the last seek.
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Move to the next result. Returns false once past the last one.
    pub fn advance(&mut self) -> bool {
        if self.state != CursorState::Seeked {
            return false;
        }
        self.position += 1;
        if self.position >= self.results.len() {
            self.state = CursorState::Eof;
            return false;
        }
        true
    }

    /// Ordinal of the current record.
    pub fn ordinal(&self) -> Option<u64> {
        match self.state {
            CursorState::Seeked => self.results.get(self.position).copied(),
            _ => None,
        }
    }

    /// Location of the current record.
    pub fn value(&self) -> Option<RecordLocation> {
        let ordinal = self.ordinal()?;
        self.locations.as_slice().get(ordinal as usize).copied()
    }
}

impl Iterator for KdCursor {
    type Item = RecordLocation;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.value()?;
        self.advance();
        Some(value)
    }
}
