//! Memory-mapped shared region.
//!
//! Both processes map the same file. Apart from frame sequence ids, all
//! accesses are plain byte copies; ids are read and written with volatile
//! accesses paired with fences so a body write is never reordered after the
//! id that publishes it.
//!
//! Field offsets are not aligned in the packed layout, so atomics cannot be
//! placed over them.

use crate::error::{AquaError, Result};
use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{Ordering, fence};
use tracing::{debug, info};

/// A file-backed mapping of exactly `SHM_SIZE` bytes.
pub struct SharedRegion {
    mmap: MmapMut,
    path: PathBuf,
    size: usize,
    _file: File,
}

impl SharedRegion {
    /// Map an existing region file. Its length must equal `size`.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| AquaError::RegionOpen {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        let actual = file.metadata()?.len();
        if actual != size as u64 {
            return Err(AquaError::RegionSize {
                path,
                expected: size as u64,
                actual,
            });
        }

        let region = Self::map(file, path, size)?;
        info!(path = %region.path.display(), size, "Attached shared region");
        Ok(region)
    }

    /// Create (or truncate) a zero-filled region file of `size` bytes.
    pub fn create(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| AquaError::RegionOpen {
                path: path.clone(),
                cause: e.to_string(),
            })?;
        file.set_len(size as u64).map_err(|e| AquaError::RegionOpen {
            path: path.clone(),
            cause: e.to_string(),
        })?;

        let region = Self::map(file, path, size)?;
        debug!(path = %region.path.display(), size, "Created shared region");
        Ok(region)
    }

    fn map(file: File, path: PathBuf, size: usize) -> Result<Self> {
        // SAFETY: the data plane writes the file concurrently; every access
        // below is bounds-checked, frame ids go through volatile loads and
        // stores, and bodies are plain copies validated against those ids.
        let mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| AquaError::RegionMmap {
                    path: path.clone(),
                    cause: e.to_string(),
                })?
        };
        Ok(Self {
            mmap,
            path,
            size,
            _file: file,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, start: usize, len: usize) -> Result<()> {
        match start.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(AquaError::RegionBounds {
                start,
                end: start.saturating_add(len),
                size: self.size,
            }),
        }
    }

    /// Copy `range` into `buf`, resizing `buf` to fit.
    pub fn read_into(&self, range: Range<usize>, buf: &mut Vec<u8>) -> Result<()> {
        let len = range.end.saturating_sub(range.start);
        self.check(range.start, len)?;
        buf.resize(len, 0);
        // SAFETY: bounds checked above; the other process may write
        // concurrently, callers validate the copy with the frame id.
        unsafe {
            ptr::copy_nonoverlapping(self.mmap.as_ptr().add(range.start), buf.as_mut_ptr(), len);
        }
        Ok(())
    }

    /// Copy `range` into a new vector.
    pub fn read(&self, range: Range<usize>) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(range, &mut buf)?;
        Ok(buf)
    }

    /// Write `bytes` starting at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check(offset, bytes.len())?;
        // SAFETY: bounds checked above.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mmap.as_mut_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Read a little-endian `u32` at `offset`, then issue an acquire fence so
    /// later reads are not hoisted above it.
    pub fn load_u32_acquire(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked; `[u8; 4]` has alignment 1.
        let bytes = unsafe { ptr::read_volatile(self.mmap.as_ptr().add(offset) as *const [u8; 4]) };
        fence(Ordering::Acquire);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Issue a release fence, then write a little-endian `u32` at `offset`.
    pub fn store_u32_release(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4)?;
        fence(Ordering::Release);
        // SAFETY: bounds checked; `[u8; 4]` has alignment 1.
        unsafe {
            ptr::write_volatile(
                self.mmap.as_mut_ptr().add(offset) as *mut [u8; 4],
                value.to_le_bytes(),
            );
        }
        Ok(())
    }

    /// Flush outstanding writes to the backing file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// Exclusive advisory lock marking the single writer of a region's control
/// frames. Released on drop.
#[derive(Debug)]
pub struct ControlLock {
    file: File,
    path: PathBuf,
}

impl ControlLock {
    /// Lock file path for a region (`<region>.ctl.lock`).
    pub fn lock_path(region: &Path) -> PathBuf {
        let mut name = region.as_os_str().to_owned();
        name.push(".ctl.lock");
        PathBuf::from(name)
    }

    /// Acquire the lock without blocking.
    pub fn acquire(region: &Path) -> Result<Self> {
        let path = Self::lock_path(region);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| AquaError::ControlLocked {
                path: path.clone(),
                cause: e.to_string(),
            })?;
        file.try_lock_exclusive()
            .map_err(|e| AquaError::ControlLocked {
                path: path.clone(),
                cause: e.to_string(),
            })?;
        debug!(path = %path.display(), "Acquired control lock");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ControlLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut region = SharedRegion::create(&path, 64).unwrap();

        region.write(10, &[1, 2, 3]).unwrap();
        assert_eq!(region.read(9..14).unwrap(), vec![0, 1, 2, 3, 0]);
        assert!(region.write(62, &[0; 4]).is_err());
        assert!(matches!(region.read(60..65), Err(AquaError::RegionBounds { .. })));
    }

    #[test]
    fn unaligned_id_access() {
        let dir = tempdir().unwrap();
        let mut region = SharedRegion::create(dir.path().join("region"), 32).unwrap();
        region.store_u32_release(5, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.load_u32_acquire(5).unwrap(), 0xDEAD_BEEF);
        assert_eq!(region.read(5..9).unwrap(), 0xDEAD_BEEFu32.to_le_bytes().to_vec());
    }

    #[test]
    fn two_mappings_share_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut writer = SharedRegion::create(&path, 32).unwrap();
        let reader = SharedRegion::open(&path, 32).unwrap();
        writer.write(0, &[7; 4]).unwrap();
        assert_eq!(reader.read(0..4).unwrap(), vec![7; 4]);
    }

    #[test]
    fn open_rejects_size_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        SharedRegion::create(&path, 32).unwrap();
        let err = SharedRegion::open(&path, 64).unwrap_err();
        assert!(matches!(err, AquaError::RegionSize { expected: 64, actual: 32, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn open_missing_file() {
        let dir = tempdir().unwrap();
        let err = SharedRegion::open(dir.path().join("absent"), 32).unwrap_err();
        assert!(matches!(err, AquaError::RegionOpen { .. }));
    }

    #[test]
    fn control_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("region");
        let lock = ControlLock::acquire(&region).unwrap();
        assert!(lock.path().ends_with("region.ctl.lock"));
        assert!(matches!(
            ControlLock::acquire(&region),
            Err(AquaError::ControlLocked { .. })
        ));
        drop(lock);
        assert!(ControlLock::acquire(&region).is_ok());
    }
}
