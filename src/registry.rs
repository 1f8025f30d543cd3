//! Shared-memory metadata registry
//!
//! An ordered key → JSON value map plus the next-auto-key counter, published
//! into the `<tank>_meta` region as one serialized blob with a zero-padded
//! tail. Readers trim the padding and decode the whole image, so a publish
//! must always happen before a mutating operation returns. Re-encoding the
//! full map on every mutation is O(total metadata size) by design.
//!
//! The reserved `params` entry carries the tank's own configuration and is
//! excluded from length counts, iteration, and filtering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TankError};
use crate::region::SharedRegion;

/// Reserved metadata key holding the tank's configuration.
pub const PARAMS_KEY: &str = "params";

/// Region name for a tank's metadata registry.
pub fn region_name(tank_name: &str) -> String {
    format!("{tank_name}_meta")
}

/// The decoded content of a metadata region: the full mapping (including
/// `params`) and the next-auto-key counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryImage {
    pub entries: BTreeMap<String, Value>,
    pub next_key: u64,
}

impl RegistryImage {
    /// Number of vector entries, excluding the reserved `params` entry.
    pub fn live_count(&self) -> usize {
        let params = usize::from(self.entries.contains_key(PARAMS_KEY));
        self.entries.len() - params
    }

    /// Iterate vector entries only (reserved keys skipped).
    pub fn iter_vectors(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().filter(|(k, _)| k.as_str() != PARAMS_KEY)
    }
}

pub struct MetadataRegistry {
    region: SharedRegion,
    image: RegistryImage,
}

impl MetadataRegistry {
    /// Allocate the metadata region and publish an initial image.
    pub fn create(tank_name: &str, region_size: usize, initial: RegistryImage) -> Result<Self> {
        let region = SharedRegion::create(&region_name(tank_name), region_size)?;
        let mut registry = Self {
            region,
            image: RegistryImage::default(),
        };
        let bytes = registry.encode(&initial)?;
        registry.commit(initial, &bytes);
        Ok(registry)
    }

    /// Attach to an existing metadata region and decode the current image.
    pub fn attach(tank_name: &str) -> Result<Self> {
        let region = SharedRegion::attach(&region_name(tank_name))?;
        let mut registry = Self {
            region,
            image: RegistryImage::default(),
        };
        registry.refresh()?;
        Ok(registry)
    }

    pub fn image(&self) -> &RegistryImage {
        &self.image
    }

    /// Live vector count (excludes `params`).
    pub fn live_count(&self) -> usize {
        self.image.live_count()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.image.entries.get(key)
    }

    /// Serialize a candidate image, enforcing the region capacity.
    ///
    /// Exceeding the fixed region size is a fatal allocation error, never a
    /// silent truncation. Callers encode *before* mutating the vector buffer
    /// so that a failure leaves both regions untouched.
    pub fn encode(&self, image: &RegistryImage) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(image)?;
        if bytes.len() > self.region.len() {
            return Err(TankError::SerializationOverflow {
                size: bytes.len(),
                capacity: self.region.len(),
            });
        }
        Ok(bytes)
    }

    /// Install a pre-encoded image: overwrite the shared region and zero-pad
    /// the remainder. Infallible once `encode` has succeeded.
    pub fn commit(&mut self, image: RegistryImage, bytes: &[u8]) {
        let buf = self.region.as_mut_slice();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()..].fill(0);
        self.image = image;
    }

    /// Encode and publish the given image in one step.
    pub fn publish(&mut self, image: RegistryImage) -> Result<()> {
        let bytes = self.encode(&image)?;
        self.commit(image, &bytes);
        Ok(())
    }

    /// Re-read the shared region, replacing the local image with whatever
    /// another process last published.
    pub fn refresh(&mut self) -> Result<()> {
        self.image = Self::decode(self.region.as_slice())?;
        Ok(())
    }

    fn decode(raw: &[u8]) -> Result<RegistryImage> {
        let end = raw
            .iter()
            .rposition(|&b| b != 0)
            .map(|p| p + 1)
            .unwrap_or(0);
        if end == 0 {
            return Ok(RegistryImage::default());
        }
        Ok(serde_json::from_slice(&raw[..end])?)
    }

    pub fn release(&mut self) {
        self.region.release();
    }

    pub fn is_released(&self) -> bool {
        self.region.is_released()
    }
}
