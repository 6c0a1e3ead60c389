//! # Shared Memory Abstraction
//!
//! A [`Shmem`] is a named window over platform memory shared with the
//! application processors: a base address, a size, and bounds-checked
//! read/write/fill operations that delegate to a platform [`ShmemOps`]
//! object.
//!
//! Two stock ops implementations cover the common cases: a cache-coherent
//! one that copies bytes directly, and a cache-non-coherent one that
//! cleans the affected range around every access through a [`CacheOps`]
//! hook. Tests and loopback configurations use [`Shmem::heap`], which
//! owns its backing storage and stands in for platform MMIO.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;

use crate::error::{Result, RpmiError};

/// Platform operations behind a shared-memory window.
///
/// Addresses are absolute (base + offset); implementations decide how to
/// reach them (direct load/store, cache maintenance, emulation).
pub trait ShmemOps: Send + Sync {
    /// Read `dst.len()` bytes from `addr`.
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<()>;
    /// Write `src` to `addr`.
    fn write(&self, addr: u64, src: &[u8]) -> Result<()>;
    /// Fill `len` bytes at `addr` with `byte`.
    fn fill(&self, addr: u64, byte: u8, len: usize) -> Result<()>;
}

/// Cache maintenance hook used by the non-coherent stock ops.
pub trait CacheOps: Send + Sync {
    /// Clean (write back) the cache lines covering `[addr, addr + len)`.
    fn clean(&self, addr: u64, len: usize);
}

/// Stock ops: direct byte copies over physical memory.
struct DirectOps {
    cache: Option<Arc<dyn CacheOps>>,
}

impl ShmemOps for DirectOps {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clean(addr, dst.len());
        }
        // SAFETY: the range was declared valid when the ops were created.
        unsafe {
            core::ptr::copy_nonoverlapping(addr as usize as *const u8, dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<()> {
        // SAFETY: the range was declared valid when the ops were created.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), addr as usize as *mut u8, src.len());
        }
        if let Some(cache) = &self.cache {
            cache.clean(addr, src.len());
        }
        Ok(())
    }

    fn fill(&self, addr: u64, byte: u8, len: usize) -> Result<()> {
        // SAFETY: the range was declared valid when the ops were created.
        unsafe {
            core::ptr::write_bytes(addr as usize as *mut u8, byte, len);
        }
        if let Some(cache) = &self.cache {
            cache.clean(addr, len);
        }
        Ok(())
    }
}

/// Stock cache-coherent ops: plain byte copy/set.
///
/// # Safety
///
/// Every address a `Shmem` built over these ops can touch must be valid,
/// dereferenceable memory for the lifetime of that `Shmem`.
pub unsafe fn coherent_ops() -> Arc<dyn ShmemOps> {
    Arc::new(DirectOps { cache: None })
}

/// Stock cache-non-coherent ops: byte copy/set with a cache clean before
/// reads and after writes and fills (invalidate is modelled as a clean).
///
/// # Safety
///
/// Same contract as [`coherent_ops`].
pub unsafe fn non_coherent_ops(cache: Arc<dyn CacheOps>) -> Arc<dyn ShmemOps> {
    Arc::new(DirectOps { cache: Some(cache) })
}

/// A named shared-memory window.
pub struct Shmem {
    name: String,
    base: u64,
    size: usize,
    ops: Arc<dyn ShmemOps>,
    _backing: Option<Box<[u64]>>,
}

impl core::fmt::Debug for Shmem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shmem")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

impl Shmem {
    /// Create a shared-memory window over platform memory.
    pub fn new(
        name: impl Into<String>,
        base: u64,
        size: usize,
        ops: Arc<dyn ShmemOps>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(RpmiError::InvalidParam);
        }
        Ok(Self {
            name: name.into(),
            base,
            size,
            ops,
            _backing: None,
        })
    }

    /// Create a window backed by owned heap memory.
    ///
    /// Useful for loopback transports and host-side tests; behaves exactly
    /// like a platform window with the coherent stock ops. The backing is
    /// 8-byte aligned, matching the alignment platform windows provide.
    pub fn heap(name: impl Into<String>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RpmiError::InvalidParam);
        }
        let backing = vec![0u64; size.div_ceil(8)].into_boxed_slice();
        let base = backing.as_ptr() as usize as u64;
        // SAFETY: the backing allocation is owned by this window and stays
        // alive (and pinned, being a boxed slice) for its whole lifetime.
        let ops = unsafe { coherent_ops() };
        Ok(Self {
            name: name.into(),
            base,
            size,
            ops,
            _backing: Some(backing),
        })
    }

    /// Name of this window.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base address of this window.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of this window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).ok_or(RpmiError::BadRange)?;
        if end > self.size {
            log::debug!(
                "shmem {}: bad range offset {:#x} len {:#x}",
                self.name,
                offset,
                len
            );
            return Err(RpmiError::BadRange);
        }
        Ok(())
    }

    /// Read `dst.len()` bytes starting at `offset`.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        self.ops.read(self.base + offset as u64, dst)
    }

    /// Read one little-endian `u32` at `offset`.
    pub fn read_u32_le(&self, offset: usize) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write `src` starting at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_range(offset, src.len())?;
        self.ops.write(self.base + offset as u64, src)
    }

    /// Write one little-endian `u32` at `offset`.
    pub fn write_u32_le(&self, offset: usize, v: u32) -> Result<()> {
        self.write(offset, &v.to_le_bytes())
    }

    /// Fill `len` bytes starting at `offset` with `byte`.
    pub fn fill(&self, offset: usize, byte: u8, len: usize) -> Result<()> {
        self.check_range(offset, len)?;
        self.ops.fill(self.base + offset as u64, byte, len)
    }
}
