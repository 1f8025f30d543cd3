//! Named process-shared memory regions
//!
//! A region is a fixed-size file under a shm directory (`/dev/shm` on Linux,
//! the system temp dir elsewhere) mapped read/write with `memmap2`. Every
//! process that maps the same name sees the same bytes through the shared
//! page cache, which is the same mechanism OS-level shared memory uses.
//!
//! The directory can be overridden with the `TANKDB_SHM_DIR` environment
//! variable, which tests use to isolate their regions.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{Result, TankError};

/// Resolve the directory shared regions live in.
pub fn shm_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TANKDB_SHM_DIR") {
        return PathBuf::from(dir);
    }
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// A named, fixed-size shared memory region.
///
/// Created regions own their backing file and unlink it on [`release`];
/// attached regions only unmap. Release is idempotent.
///
/// [`release`]: SharedRegion::release
pub struct SharedRegion {
    name: String,
    path: PathBuf,
    mmap: Option<MmapMut>,
    len: usize,
    owner: bool,
}

impl SharedRegion {
    /// Create a new zero-filled region of `size` bytes.
    ///
    /// Fails if a region with this name already exists.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let path = shm_dir().join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| TankError::region(name, e))?;
        file.set_len(size as u64)
            .map_err(|e| TankError::region(name, e))?;

        // Safety: the file was just created with the requested length and is
        // only resized through this type.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| TankError::region(name, e))?;

        Ok(Self {
            name: name.to_string(),
            path,
            mmap: Some(mmap),
            len: size,
            owner: true,
        })
    }

    /// Attach to an existing region by name.
    pub fn attach(name: &str) -> Result<Self> {
        let path = shm_dir().join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| TankError::region(name, e))?;
        let len = file
            .metadata()
            .map_err(|e| TankError::region(name, e))?
            .len() as usize;

        // Safety: mapped read/write over the full current file length. The
        // cooperating processes never truncate a live region.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| TankError::region(name, e))?;

        Ok(Self {
            name: name.to_string(),
            path,
            mmap: Some(mmap),
            len,
            owner: false,
        })
    }

    /// Attach if the region exists, otherwise create it.
    pub fn attach_or_create(name: &str, size: usize) -> Result<Self> {
        if shm_dir().join(name).exists() {
            Self::attach(name)
        } else {
            Self::create(name, size)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_released(&self) -> bool {
        self.mmap.is_none()
    }

    /// Whole-region read view.
    ///
    /// # Panics
    ///
    /// Panics if the region has been released.
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_ref().expect("region released")
    }

    /// Whole-region write view.
    ///
    /// # Panics
    ///
    /// Panics if the region has been released.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.mmap.as_mut().expect("region released")
    }

    /// Unmap the region and, for owning regions, unlink the backing file.
    ///
    /// Calling this twice (or releasing a region whose file is already gone)
    /// is a no-op.
    pub fn release(&mut self) {
        if self.mmap.take().is_none() {
            return;
        }
        if self.owner {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("failed to unlink shared region '{}': {}", self.name, e);
                }
            }
        }
    }
}
