use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use memmap2::MmapMut;
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;

use crate::codec::{decode_i64, KeyType};
use crate::engine::{Engine, EnginePool};
use crate::error::{KdError, Result};
use crate::kdtree::{build_files, BuildSummary};
use crate::paths::IndexPaths;
use crate::shim::document::{lookup, point, Number};
use crate::shim::predicate::{suitability, Suitability};
use crate::shim::{IndexMeta, IndexSpec, KdCursor};

/// Where a record lives in the host database's storage.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct RecordLocation {
    pub file: u32,
    pub offset: u32,
}

impl RecordLocation {
    pub fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }
}

/// A sequential enumeration of the records to index.
pub trait RecordSource {
    /// The next record and its location, or `None` after the last one.
    fn next_record(&mut self) -> Result<Option<(JsonValue, RecordLocation)>>;
}

impl<I> RecordSource for I
where
    I: Iterator<Item = (JsonValue, RecordLocation)>,
{
    fn next_record(&mut self) -> Result<Option<(JsonValue, RecordLocation)>> {
        Ok(self.next())
    }
}

/// Outcome of [`KdAccessMethod::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Records written to the index.
    pub records: u64,
    /// Records left out because a dimension was missing or not a number.
    pub skipped: u64,
    /// Key type of every dimension.
    pub types: Vec<KeyType>,
    pub tree: BuildSummary,
}

/// The KD-tree index as the host database drives it: build, query through cursors, drop.
///
/// Indexes are immutable once built; every mutation entry point fails with
/// [`KdError::Unsupported`].
#[derive(Debug, Clone)]
pub struct KdAccessMethod {
    paths: IndexPaths,
    engines: Arc<EnginePool>,
}

impl KdAccessMethod {
    pub fn new(paths: IndexPaths, engines: Arc<EnginePool>) -> Self {
        Self { paths, engines }
    }

    /// Base path of the index `index` on collection `namespace`: `<dir>/<namespace>.<index>`.
    pub fn file_name(dir: &Path, namespace: &str, index: &str) -> PathBuf {
        dir.join(format!("{}.{}", namespace, index))
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Read the `.meta` file.
    pub fn meta(&self) -> Result<IndexMeta> {
        IndexMeta::read(&self.paths.meta())
    }

    /// Index every record of `source`.
    ///
    /// Records missing one of the declared dimensions, or holding something other than a number
    /// there, are skipped. A dimension takes the type `spec` pins it to, or the type of the first
    /// value seen. An unpinned integer dimension becomes a float dimension once a fractional value
    /// arrives, and the records already written are re-encoded. Other values are converted when
    /// that is lossless and fail the build otherwise. Nothing is left behind by a failed build.
    pub fn build(&self, spec: &IndexSpec, mut source: impl RecordSource) -> Result<BuildReport> {
        let dims = spec.dims();
        let names = spec.dimension_names();
        tracing::info!(
            path = %self.paths.base().display(),
            dims,
            fields = ?names,
            "building index"
        );
        // a rebuilt index must not be served by a stale engine
        self.engines.close(&self.paths);

        let dir = self.paths.dir();
        let mut data = BufWriter::new(NamedTempFile::new_in(dir)?);
        let mut disk = BufWriter::new(NamedTempFile::new_in(dir)?);
        let mut types = spec.pinned_types();
        let pinned: Vec<bool> = types.iter().map(Option::is_some).collect();
        let mut record = vec![0u64; dims + 1];
        let mut values: Vec<Number> = Vec::with_capacity(dims);
        let mut records = 0u64;
        let mut skipped = 0u64;

        while let Some((document, location)) = source.next_record()? {
            if !extract(spec, &document, &mut values) {
                skipped += 1;
                tracing::warn!(
                    file = location.file,
                    offset = location.offset,
                    "record misses an indexed field or holds a non-numeric value, skipping"
                );
                continue;
            }
            for (dim, value) in values.iter().enumerate() {
                let mut ty = *types[dim].get_or_insert(value.natural_type());
                if !pinned[dim] && ty == KeyType::Integer && value.to_key(ty).is_none() {
                    data.flush()?;
                    promote_to_float(data.get_ref().as_file(), dims, dim, records)
                        .map_err(|e| match e {
                            KdError::Config(msg) => {
                                KdError::Config(format!("field {}: {}", names[dim], msg))
                            }
                            e => e,
                        })?;
                    tracing::debug!(field = %names[dim], records, "promoted dimension to float");
                    ty = KeyType::Float;
                    types[dim] = Some(ty);
                }
                record[dim] = value.to_key(ty).ok_or_else(|| {
                    KdError::Config(format!(
                        "{} cannot be stored losslessly in {:?} field {}",
                        value.as_f64(),
                        ty,
                        names[dim]
                    ))
                })?;
            }
            record[dims] = records;
            data.write_all(bytemuck::cast_slice(&record))?;
            disk.write_all(bytemuck::bytes_of(&location))?;
            records += 1;
        }

        let data = data.into_inner().map_err(|e| e.into_error())?;
        let disk = disk.into_inner().map_err(|e| e.into_error())?;
        let block_capacity = self.engines.config().block_capacity;
        let tree = build_files(data.path(), &self.paths, dims, block_capacity)?;
        data.persist(self.paths.data()).map_err(|e| e.error)?;
        disk.persist(self.paths.disk()).map_err(|e| e.error)?;

        // dimensions without a single value default to float
        let types: Vec<KeyType> = types
            .into_iter()
            .map(|t| t.unwrap_or(KeyType::Float))
            .collect();
        let meta = IndexMeta::new(
            spec.geo_fields().to_vec(),
            spec.scalar_fields().iter().map(|f| f.name.clone()).collect(),
            types.clone(),
        )?;
        meta.write(&self.paths.meta())?;

        tracing::info!(records, skipped, leaves = tree.leaves, "index built");
        Ok(BuildReport {
            records,
            skipped,
            types,
            tree,
        })
    }

    /// The engine serving this index, opened through the shared pool.
    pub fn engine(&self) -> Result<Arc<Engine>> {
        let meta = self.meta()?;
        self.engines.get_or_open(&self.paths, meta.dims())
    }

    /// Rate `predicate` for this index.
    pub fn suitability(&self, predicate: &JsonValue) -> Result<Suitability> {
        Ok(suitability(&self.meta()?, predicate))
    }

    /// A cursor over this index, not yet positioned.
    pub fn new_cursor(&self) -> Result<KdCursor> {
        let meta = self.meta()?;
        let engine = self.engines.get_or_open(&self.paths, meta.dims())?;
        KdCursor::open(engine, meta, &self.paths.disk())
    }

    /// Close the engine and remove every file of the index.
    pub fn drop_index(&self) -> Result<()> {
        tracing::info!(path = %self.paths.base().display(), "dropping index");
        self.engines.close(&self.paths);
        self.paths.remove_all()
    }

    pub fn insert(&self, _document: &JsonValue, _location: RecordLocation) -> Result<u64> {
        Err(KdError::Unsupported("insert"))
    }

    pub fn remove(&self, _document: &JsonValue, _location: RecordLocation) -> Result<u64> {
        Err(KdError::Unsupported("remove"))
    }

    pub fn validate_update(
        &self,
        _from: &JsonValue,
        _to: &JsonValue,
        _location: RecordLocation,
    ) -> Result<()> {
        Err(KdError::Unsupported("validate_update"))
    }

    pub fn update(&self) -> Result<u64> {
        Err(KdError::Unsupported("update"))
    }

    pub fn touch(&self, _document: &JsonValue) -> Result<()> {
        Err(KdError::Unsupported("touch"))
    }

    pub fn validate(&self) -> Result<u64> {
        Err(KdError::Unsupported("validate"))
    }
}

/// Re-encode dimension `dim` of the first `records` records of `file` from integer to float keys.
fn promote_to_float(file: &File, dims: usize, dim: usize, records: u64) -> Result<()> {
    if records == 0 {
        return Ok(());
    }
    // SAFETY: the temp file is private to this build.
    let mut map = unsafe { MmapMut::map_mut(file)? };
    let words: &mut [u64] = bytemuck::try_cast_slice_mut(&mut map[..])
        .map_err(|e| KdError::Format(format!("record file: {}", e)))?;
    for record in words.chunks_exact_mut(dims + 1).take(records as usize) {
        let value = decode_i64(record[dim]);
        record[dim] = Number::Int(value).to_key(KeyType::Float).ok_or_else(|| {
            KdError::Config(format!("{} has no exact float representation", value))
        })?;
    }
    map.flush()?;
    Ok(())
}

/// Collect the value of every dimension of `document` into `values`. Returns false when one is
/// missing or not a number.
fn extract(spec: &IndexSpec, document: &JsonValue, values: &mut Vec<Number>) -> bool {
    values.clear();
    for field in spec.geo_fields() {
        match lookup(document, field).and_then(point) {
            Some([x, y]) => values.extend([x, y]),
            None => return false,
        }
    }
    for field in spec.scalar_fields() {
        match lookup(document, &field.name).and_then(Number::from_json) {
            Some(n) => values.push(n),
            None => return false,
        }
    }
    true
}
