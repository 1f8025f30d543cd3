//! Fixed-capacity vector slot array over a shared region
//!
//! The buffer is a capacity × dim `f32` matrix living in a single shared
//! memory region named `<tank>_vector`. Rows past the live count are
//! zero-filled but logically unused; the live count itself is tracked by the
//! metadata registry, not here.

use crate::error::{Result, TankError};
use crate::region::SharedRegion;

pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Region name for a tank's vector buffer.
pub fn region_name(tank_name: &str) -> String {
    format!("{tank_name}_vector")
}

pub struct VectorBuffer {
    region: SharedRegion,
    dim: usize,
    capacity: usize,
}

impl VectorBuffer {
    /// Byte size of the backing region for a given shape.
    pub fn region_size(dim: usize, capacity: usize) -> usize {
        capacity * dim * ELEMENT_SIZE
    }

    /// Allocate a fresh, zero-filled buffer region.
    pub fn create(tank_name: &str, dim: usize, capacity: usize) -> Result<Self> {
        let region = SharedRegion::create(&region_name(tank_name), Self::region_size(dim, capacity))?;
        Ok(Self {
            region,
            dim,
            capacity,
        })
    }

    /// Attach to an existing buffer region, validating its size.
    pub fn attach(tank_name: &str, dim: usize, capacity: usize) -> Result<Self> {
        let region = SharedRegion::attach(&region_name(tank_name))?;
        let expected = Self::region_size(dim, capacity);
        if region.len() < expected {
            return Err(TankError::Format(format!(
                "vector region '{}' is {} bytes, expected at least {}",
                region.name(),
                region.len(),
                expected
            )));
        }
        Ok(Self {
            region,
            dim,
            capacity,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.capacity {
            return Err(TankError::IndexOutOfBounds {
                index,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(TankError::InvalidDimension {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// All slots as one flat `f32` slice.
    ///
    /// The mmap is page-aligned, so the cast cannot fail on alignment.
    fn slots(&self) -> &[f32] {
        bytemuck::cast_slice(&self.region.as_slice()[..Self::region_size(self.dim, self.capacity)])
    }

    fn slots_mut(&mut self) -> &mut [f32] {
        let len = Self::region_size(self.dim, self.capacity);
        bytemuck::cast_slice_mut(&mut self.region.as_mut_slice()[..len])
    }

    /// Overwrite the slot at `index`.
    pub fn write(&mut self, index: usize, vector: &[f32]) -> Result<()> {
        self.check_index(index)?;
        self.check_dim(vector)?;
        let dim = self.dim;
        self.slots_mut()[index * dim..(index + 1) * dim].copy_from_slice(vector);
        Ok(())
    }

    /// Copy out the slot at `index`.
    pub fn read(&self, index: usize) -> Result<Vec<f32>> {
        self.check_index(index)?;
        Ok(self.row(index).to_vec())
    }

    /// Borrow the slot at `index`. Caller must have bounds-checked.
    pub fn row(&self, index: usize) -> &[f32] {
        &self.slots()[index * self.dim..(index + 1) * self.dim]
    }

    /// Borrow the first `count` rows as one contiguous row-major matrix.
    pub fn read_range(&self, start: usize, count: usize) -> Result<&[f32]> {
        if start + count > self.capacity {
            return Err(TankError::IndexOutOfBounds {
                index: start + count,
                capacity: self.capacity,
            });
        }
        Ok(&self.slots()[start * self.dim..(start + count) * self.dim])
    }

    /// Move the row at `src` into `dst` (used by deletion compaction).
    pub fn shift(&mut self, src: usize, dst: usize) -> Result<()> {
        self.check_index(src)?;
        self.check_index(dst)?;
        if src == dst {
            return Ok(());
        }
        let dim = self.dim;
        let slots = self.slots_mut();
        slots.copy_within(src * dim..(src + 1) * dim, dst * dim);
        Ok(())
    }

    /// Zero-fill the row at `index`.
    pub fn zero(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let dim = self.dim;
        self.slots_mut()[index * dim..(index + 1) * dim].fill(0.0);
        Ok(())
    }

    /// Zero-fill every slot.
    pub fn zero_all(&mut self) {
        self.slots_mut().fill(0.0);
    }

    /// Release the backing region (idempotent).
    pub fn release(&mut self) {
        self.region.release();
    }

    pub fn is_released(&self) -> bool {
        self.region.is_released()
    }
}
