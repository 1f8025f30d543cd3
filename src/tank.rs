//! Tank: a named, fixed-capacity vector container with metadata
//!
//! A tank composes one [`VectorBuffer`] and one [`MetadataRegistry`] under a
//! single identity. Keys are 1-indexed decimal strings and always denote the
//! vector's current row: key `k` is row `k - 1`. Deleting a row shifts every
//! subsequent row down and renumbers its key, so keys are **not stable
//! across deletions** — callers must not hold a key across a delete
//! elsewhere in the tank.
//!
//! All operations on a tank are serialized by one per-tank mutex. Processes
//! writing directly to the same tank's regions concurrently (outside the
//! command-channel path) are the caller's responsibility.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buffer::VectorBuffer;
use crate::channel::{Command, CommandChannel};
use crate::error::{Result, TankError};
use crate::registry::{MetadataRegistry, RegistryImage, PARAMS_KEY};
use crate::similarity::{score_rows, SimMethod};
use crate::snapshot;

/// Default per-record metadata budget; the meta region is sized
/// `meta_slot_size * capacity` bytes.
pub const DEFAULT_META_SLOT_SIZE: usize = 4096;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// A tank's shape and defaults, stored under the reserved `params` metadata
/// key so a re-attaching process can reconstruct it without re-specifying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankConfig {
    pub name: String,
    pub dim: usize,
    pub capacity: usize,
    pub metric: SimMethod,
    pub persist: bool,
    pub meta_slot_size: usize,
}

impl TankConfig {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            capacity: DEFAULT_CAPACITY,
            metric: SimMethod::Cosine,
            persist: false,
            meta_slot_size: DEFAULT_META_SLOT_SIZE,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn metric(mut self, metric: SimMethod) -> Self {
        self.metric = metric;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn meta_slot_size(mut self, meta_slot_size: usize) -> Self {
        self.meta_slot_size = meta_slot_size;
        self
    }

    pub fn meta_region_size(&self) -> usize {
        self.meta_slot_size * self.capacity
    }

    fn to_params(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_params(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// One search result: key, score, vector copy, metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    pub score: f32,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// Metadata filter: either an equality map (every field must match exactly)
/// or an opaque predicate over the metadata value.
pub enum MetadataFilter {
    Equals(serde_json::Map<String, Value>),
    Predicate(Box<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl MetadataFilter {
    fn matches(&self, meta: &Value) -> bool {
        match self {
            MetadataFilter::Equals(fields) => fields
                .iter()
                .all(|(field, expected)| meta.get(field) == Some(expected)),
            MetadataFilter::Predicate(predicate) => predicate(meta),
        }
    }
}

struct TankInner {
    buffer: VectorBuffer,
    registry: MetadataRegistry,
}

pub struct Tank {
    config: TankConfig,
    inner: Mutex<TankInner>,
}

impl Tank {
    /// Allocate both shared regions for a fresh tank and publish its initial
    /// metadata image (just `params`).
    pub fn create(config: TankConfig) -> Result<Self> {
        let mut buffer = VectorBuffer::create(&config.name, config.dim, config.capacity)?;

        let mut entries = std::collections::BTreeMap::new();
        entries.insert(PARAMS_KEY.to_string(), config.to_params()?);
        let initial = RegistryImage {
            entries,
            next_key: 1,
        };

        let registry =
            match MetadataRegistry::create(&config.name, config.meta_region_size(), initial) {
                Ok(registry) => registry,
                Err(e) => {
                    // do not leak the vector region on a half-built tank
                    buffer.release();
                    return Err(e);
                }
            };

        Ok(Self {
            config,
            inner: Mutex::new(TankInner { buffer, registry }),
        })
    }

    /// Attach to an existing tank's regions, reconstructing its shape from
    /// the published `params` entry.
    pub fn attach(name: &str) -> Result<Self> {
        let registry = MetadataRegistry::attach(name)?;
        let params = registry
            .get(PARAMS_KEY)
            .ok_or_else(|| TankError::Format(format!("tank '{name}' has no params entry")))?;
        let config = TankConfig::from_params(params)?;
        let buffer = VectorBuffer::attach(name, config.dim, config.capacity)?;
        Ok(Self {
            config,
            inner: Mutex::new(TankInner { buffer, registry }),
        })
    }

    pub fn config(&self) -> &TankConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.inner.lock().registry.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dim {
            return Err(TankError::InvalidDimension {
                expected: self.config.dim,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Map a key to its zero-based row index, validating against the live
    /// count. Keys are the dense sequence `1..=live_count`.
    fn key_to_index(key: &str, live_count: usize) -> Result<usize> {
        let k: usize = key
            .parse()
            .map_err(|_| TankError::not_found(format!("key '{key}'")))?;
        if k == 0 || k > live_count {
            return Err(TankError::not_found(format!("key '{key}'")));
        }
        Ok(k - 1)
    }

    /// Add one vector and its metadata; returns the assigned key.
    pub fn add_vector(&self, vector: &[f32], meta: Value) -> Result<String> {
        self.check_dim(vector)?;
        let mut inner = self.inner.lock();

        let count = inner.registry.live_count();
        if count >= self.config.capacity {
            return Err(TankError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let key = (count + 1).to_string();
        let mut image = inner.registry.image().clone();
        image.entries.insert(key.clone(), meta);
        image.next_key = (count + 2) as u64;

        // encode before touching the buffer so a metadata overflow leaves
        // both regions untouched
        let bytes = inner.registry.encode(&image)?;
        inner.buffer.write(count, vector)?;
        inner.registry.commit(image, &bytes);
        Ok(key)
    }

    /// Add a batch of vectors atomically: either every row is written or
    /// none is.
    pub fn add_vectors(&self, vectors: &[Vec<f32>], metadata: Vec<Value>) -> Result<Vec<String>> {
        if vectors.len() != metadata.len() {
            return Err(TankError::BatchMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        for vector in vectors {
            self.check_dim(vector)?;
        }

        let mut inner = self.inner.lock();
        let count = inner.registry.live_count();
        if count + vectors.len() > self.config.capacity {
            return Err(TankError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let mut image = inner.registry.image().clone();
        let mut keys = Vec::with_capacity(vectors.len());
        for (i, meta) in metadata.into_iter().enumerate() {
            let key = (count + i + 1).to_string();
            image.entries.insert(key.clone(), meta);
            keys.push(key);
        }
        image.next_key = (count + vectors.len() + 1) as u64;

        let bytes = inner.registry.encode(&image)?;
        for (i, vector) in vectors.iter().enumerate() {
            inner.buffer.write(count + i, vector)?;
        }
        inner.registry.commit(image, &bytes);
        Ok(keys)
    }

    /// Brute-force similarity search over the live rows.
    ///
    /// Results are ordered by descending score, ties by ascending row index.
    /// When `top_k < live_count` a partition selects the candidates and only
    /// those are sorted; otherwise all rows are sorted.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        method: Option<SimMethod>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dim(query)?;
        let inner = self.inner.lock();

        let count = inner.registry.live_count();
        if count == 0 || top_k == 0 {
            return Ok(Vec::new());
        }

        let method = method.unwrap_or(self.config.metric);
        let rows = inner.buffer.read_range(0, count)?;
        let scores = score_rows(method, rows, self.config.dim, query);

        let mut order: Vec<usize> = (0..count).collect();
        let by_score_desc = |a: &usize, b: &usize| {
            scores[*b].total_cmp(&scores[*a]).then_with(|| a.cmp(b))
        };
        if top_k < count {
            order.select_nth_unstable_by(top_k, by_score_desc);
            order.truncate(top_k);
        }
        order.sort_unstable_by(by_score_desc);

        order
            .into_iter()
            .map(|idx| {
                let key = (idx + 1).to_string();
                Ok(SearchHit {
                    score: scores[idx],
                    vector: inner.buffer.read(idx)?,
                    metadata: inner.registry.get(&key).cloned().unwrap_or(Value::Null),
                    key,
                })
            })
            .collect()
    }

    /// Overwrite a vector in place; metadata is replaced only when provided
    /// (never merged).
    pub fn update_vector(
        &self,
        key: &str,
        new_vector: &[f32],
        new_metadata: Option<Value>,
    ) -> Result<()> {
        self.check_dim(new_vector)?;
        let mut inner = self.inner.lock();

        let count = inner.registry.live_count();
        let idx = Self::key_to_index(key, count)?;

        let mut image = inner.registry.image().clone();
        if let Some(meta) = new_metadata {
            image.entries.insert(key.to_string(), meta);
        }

        let bytes = inner.registry.encode(&image)?;
        inner.buffer.write(idx, new_vector)?;
        inner.registry.commit(image, &bytes);
        Ok(())
    }

    /// Keys whose metadata matches the filter, in numeric key order.
    /// The reserved `params` entry is always excluded.
    pub fn filter_by_metadata(&self, filter: &MetadataFilter) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .registry
            .image()
            .iter_vectors()
            .filter(|(_, meta)| filter.matches(meta))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_by_key(|k| k.parse::<usize>().unwrap_or(usize::MAX));
        keys
    }

    /// Delete one key. Shifts every subsequent row down by one, zero-fills
    /// the vacated tail row, and renumbers all following keys. O(live_count).
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let count = inner.registry.live_count();
        let idx = Self::key_to_index(key, count)?;

        let image = Self::renumbered_image(inner.registry.image(), count, |i| i != idx);
        let bytes = inner.registry.encode(&image)?;

        for i in idx..count - 1 {
            inner.buffer.shift(i + 1, i)?;
        }
        inner.buffer.zero(count - 1)?;
        inner.registry.commit(image, &bytes);
        Ok(())
    }

    /// Batch delete. Unknown keys are silently skipped; returns only the
    /// subset that was actually found, in input order. (Asymmetric with
    /// [`delete`](Tank::delete), which errors on an unknown key.)
    pub fn delete_keys(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let count = inner.registry.live_count();

        let mut marked = vec![false; count];
        let mut deleted = Vec::new();
        for key in keys {
            if let Ok(idx) = Self::key_to_index(key, count) {
                if !marked[idx] {
                    marked[idx] = true;
                    deleted.push(key.clone());
                }
            }
        }
        if deleted.is_empty() {
            return Ok(deleted);
        }

        let image = Self::renumbered_image(inner.registry.image(), count, |i| !marked[i]);
        let bytes = inner.registry.encode(&image)?;

        let keep: Vec<usize> = (0..count).filter(|&i| !marked[i]).collect();
        for (new_idx, &old_idx) in keep.iter().enumerate() {
            inner.buffer.shift(old_idx, new_idx)?;
        }
        for i in keep.len()..count {
            inner.buffer.zero(i)?;
        }
        inner.registry.commit(image, &bytes);
        Ok(deleted)
    }

    /// Rebuild the registry image keeping only the rows `keep` accepts,
    /// renumbered to the dense sequence `1..=kept`.
    fn renumbered_image(
        current: &RegistryImage,
        count: usize,
        keep: impl Fn(usize) -> bool,
    ) -> RegistryImage {
        let mut image = RegistryImage::default();
        if let Some(params) = current.entries.get(PARAMS_KEY) {
            image
                .entries
                .insert(PARAMS_KEY.to_string(), params.clone());
        }
        let mut new_idx = 0usize;
        for old_idx in 0..count {
            if !keep(old_idx) {
                continue;
            }
            let old_key = (old_idx + 1).to_string();
            if let Some(meta) = current.entries.get(&old_key) {
                new_idx += 1;
                image.entries.insert(new_idx.to_string(), meta.clone());
            }
        }
        image.next_key = (new_idx + 1) as u64;
        image
    }

    /// Zero all rows, drop all metadata except `params`, reset the auto-key
    /// counter.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut image = RegistryImage {
            entries: Default::default(),
            next_key: 1,
        };
        if let Some(params) = inner.registry.get(PARAMS_KEY) {
            image.entries.insert(PARAMS_KEY.to_string(), params.clone());
        }
        let bytes = inner.registry.encode(&image)?;
        inner.buffer.zero_all();
        inner.registry.commit(image, &bytes);
        Ok(())
    }

    /// Metadata for one key, if present.
    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        if key == PARAMS_KEY {
            return None;
        }
        inner.registry.get(key).cloned()
    }

    /// Copy of the vector stored under `key`.
    pub fn get_vector(&self, key: &str) -> Result<Vec<f32>> {
        let inner = self.inner.lock();
        let idx = Self::key_to_index(key, inner.registry.live_count())?;
        inner.buffer.read(idx)
    }

    /// Re-read the shared metadata blob published by another process.
    pub fn refresh(&self) -> Result<()> {
        self.inner.lock().registry.refresh()
    }

    /// Write the two-part persistence record (live rows + metadata image).
    ///
    /// Re-reads the shared metadata first so a save triggered through the
    /// command channel captures mutations made by the attached process.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.registry.refresh()?;

        let count = inner.registry.live_count();
        let rows = inner.buffer.read_range(0, count)?.to_vec();
        snapshot::write_vectors(&snapshot::vector_path(dir, &self.config.name), self.config.dim, &rows)?;
        snapshot::write_metadata(
            &snapshot::metadata_path(dir, &self.config.name),
            inner.registry.image(),
        )?;
        Ok(())
    }

    /// Restore from the persistence record. Silent no-op when either part
    /// of the record is missing.
    pub fn load(&self, dir: &Path) -> Result<()> {
        if !snapshot::record_exists(dir, &self.config.name) {
            return Ok(());
        }

        let image = snapshot::read_metadata(&snapshot::metadata_path(dir, &self.config.name))?;
        let (dim, data) = snapshot::read_vectors(&snapshot::vector_path(dir, &self.config.name))?;
        if dim != self.config.dim {
            return Err(TankError::Format(format!(
                "snapshot dimension {} does not match tank dimension {}",
                dim, self.config.dim
            )));
        }
        let count = data.len() / dim.max(1);
        if count > self.config.capacity {
            return Err(TankError::Format(format!(
                "snapshot has {} rows, tank capacity is {}",
                count, self.config.capacity
            )));
        }

        let mut inner = self.inner.lock();
        let bytes = inner.registry.encode(&image)?;
        inner.buffer.zero_all();
        for (i, row) in data.chunks_exact(dim).enumerate() {
            inner.buffer.write(i, row)?;
        }
        inner.registry.commit(image, &bytes);
        Ok(())
    }

    /// Release both shared regions. Further operations on the tank are
    /// undefined; double-release is a no-op.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.release();
        inner.registry.release();
    }

    // ----- command-channel client helpers (same-host fast path) -----

    /// Ask a running store (via its command channel) to create a tank, then
    /// attach to the freshly allocated regions.
    pub fn request_create(
        channel_name: &str,
        config: TankConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let command = Command::Create {
            name: config.name.clone(),
            dim: config.dim,
            persist: config.persist,
            capacity: config.capacity,
            meta_slot_size: config.meta_slot_size,
            metric: config.metric,
        };
        if !CommandChannel::send(channel_name, &command, timeout) {
            return Err(TankError::Timeout);
        }
        Self::attach(&config.name)
    }

    /// Ask the owning store to persist this tank. Returns the acknowledgment
    /// status; timeouts are reported, not raised.
    pub fn request_save(&self, channel_name: &str, timeout: Duration) -> bool {
        let command = Command::Save {
            name: self.config.name.clone(),
        };
        CommandChannel::send(channel_name, &command, timeout)
    }

    /// Ask the owning store to log this tank's state with a message.
    pub fn request_log(&self, channel_name: &str, message: &str, timeout: Duration) -> bool {
        let command = Command::Log {
            name: self.config.name.clone(),
            message: message.to_string(),
        };
        CommandChannel::send(channel_name, &command, timeout)
    }
}

impl fmt::Display for Tank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tank({}, dim={}, capacity={}, len={}, persist={}, metric={})",
            self.config.name,
            self.config.dim,
            self.config.capacity,
            self.len(),
            self.config.persist,
            self.config.metric,
        )
    }
}
