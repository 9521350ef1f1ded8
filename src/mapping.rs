//! Word-granular access to the memory-mapped database file.
//!
//! Everything on disk is addressed in 32-bit big-endian words. The mapping
//! owns the opened (and exclusively locked) file together with a shared
//! read/write map of it, and is the only place that touches bytes; the rest
//! of the crate speaks physical word addresses.

use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::MmapMut;

use crate::error::{DbError, ErrorCode};
use crate::{PhysicalAddress, Word};

pub(crate) struct Mapping {
    file: File,
    map: MmapMut,
}

impl Mapping {
    /// Open (optionally creating) the backing file, lock it for exclusive
    /// use, and map it read-write shared. A zero-length file maps after
    /// being extended to `min_words`; an existing file maps at its stored
    /// size, truncated down to whole words.
    pub fn open(
        path: &Path,
        allow_creation: bool,
        min_words: u32,
    ) -> Result<(Mapping, bool), DbError> {
        use fs4::fs_std::FileExt;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(allow_creation)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                DbError::new(
                    ErrorCode::UnableToOpenFile,
                    format!("Unable to open file <{}>: {e}", path.display()),
                )
            })?;

        file.try_lock_exclusive().map_err(|e| {
            DbError::new(
                ErrorCode::UnableToOpenFile,
                format!("Unable to lock file <{}>: {e}", path.display()),
            )
        })?;

        let size = file
            .metadata()
            .map_err(|e| {
                DbError::new(
                    ErrorCode::UnableToOpenFile,
                    format!("Unable to stat file <{}>: {e}", path.display()),
                )
            })?
            .len();

        // A file shorter than one growth increment gets extended up front and
        // reported back to the caller for bootstrapping.
        let fresh = size < min_words as u64 * 4;
        if fresh {
            file.set_len(min_words as u64 * 4).map_err(|e| {
                DbError::new(
                    ErrorCode::UnableToOpenFile,
                    format!("Unable to extend file <{}>: {e}", path.display()),
                )
            })?;
        }

        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            DbError::new(
                ErrorCode::UnableToOpenFile,
                format!("Unable to map file <{}>: {e}", path.display()),
            )
        })?;

        Ok((Mapping { file, map }, fresh))
    }

    /// Mapped extent in whole words.
    pub fn words(&self) -> u32 {
        (self.map.len() / 4) as u32
    }

    /// Read the word at a physical address. Addresses past the mapped extent
    /// read as zero, the unassigned sentinel.
    pub fn word(&self, address: PhysicalAddress) -> Word {
        let offset = address as usize * 4;
        match self.map.get(offset..offset + 4) {
            Some(bytes) => BigEndian::read_u32(bytes),
            None => 0,
        }
    }

    /// Write the word at a physical address. Writes past the mapped extent
    /// are dropped; growth must happen before the write.
    pub fn set_word(&mut self, address: PhysicalAddress, value: Word) {
        let offset = address as usize * 4;
        match self.map.get_mut(offset..offset + 4) {
            Some(bytes) => BigEndian::write_u32(bytes, value),
            None => tracing::error!(
                address,
                words = self.words(),
                "write past the mapped extent dropped"
            ),
        }
    }

    /// Raw view of the first `len` bytes, for the root record.
    pub fn bytes(&self, len: usize) -> &[u8] {
        &self.map[..len]
    }

    pub fn bytes_mut(&mut self, len: usize) -> &mut [u8] {
        &mut self.map[..len]
    }

    /// Extend the backing file by `add_words` words and remap. All word
    /// addresses remain valid; anything holding byte pointers into the old
    /// map must re-derive them.
    pub fn grow(&mut self, add_words: u32) -> Result<(), DbError> {
        let new_len = self.map.len() as u64 + add_words as u64 * 4;

        self.map.flush().map_err(|e| {
            DbError::new(
                ErrorCode::UnableToReadFile,
                format!("Unable to flush map before growth: {e}"),
            )
        })?;
        self.file.set_len(new_len).map_err(|e| {
            DbError::new(
                ErrorCode::UnableToReadFile,
                format!("Unable to extend file to {new_len} bytes: {e}"),
            )
        })?;
        self.map = unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| {
            DbError::new(
                ErrorCode::UnableToReadFile,
                format!("Unable to remap file after growth: {e}"),
            )
        })?;

        tracing::debug!(words = self.words(), "database file grown");
        Ok(())
    }

    /// Flush mapped contents back to the file.
    pub fn flush(&self) -> Result<(), DbError> {
        self.map.flush().map_err(|e| {
            DbError::new(
                ErrorCode::UnableToReadFile,
                format!("Unable to flush the mapped file: {e}"),
            )
        })
    }
}
