//! The archive header (FAT): fixed-size file entries plus the free-block
//! list, serialized as a direct byte image of the in-memory structure.

use bytemuck::{Pod, Zeroable};

use crate::block::{BlockDevice, BlockIoError, BLOCK_SIZE};

/// Maximum number of files an archive can hold.
pub const MAX_FILES: usize = 100;
/// Maximum number of blocks a single file can occupy.
pub const MAX_BLOCKS_PER_FILE: usize = 64;
/// Maximum length of a stored filename, including the NUL terminator.
pub const MAX_FILENAME_LEN: usize = 256;
/// Maximum number of entries in the free-block list.
pub const MAX_FREE_BLOCKS: usize = MAX_FILES * MAX_BLOCKS_PER_FILE;

/// Reserved name under which data read from standard input is recorded.
pub const STDIN_NAME: &str = "stdin";

#[derive(Debug, thiserror::Error)]
pub enum FatError {
    #[error("archive already has the maximum of {MAX_FILES} files")]
    TooManyFiles,
    #[error("file {name:?} already has the maximum of {MAX_BLOCKS_PER_FILE} blocks")]
    TooManyBlocks { name: String },
    #[error("no file named {0:?} in the archive")]
    FileNotFound(String),
    #[error("free-block list is full ({MAX_FREE_BLOCKS} entries)")]
    FreeListFull,
    #[error("archive is too short to contain a FAT header ({found} < {expected} bytes)")]
    HeaderTooShort { expected: usize, found: usize },
    #[error(transparent)]
    Io(#[from] BlockIoError),
}

/// Metadata for one logical file stored in the archive.
///
/// Laid out with every fixed-width integer field before the trailing byte
/// array, and the array length a multiple of the struct's alignment, so the
/// struct has no compiler-inserted padding and is safely `Pod`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FileEntry {
    pub file_size: u64,
    pub num_blocks: u64,
    pub block_positions: [u64; MAX_BLOCKS_PER_FILE],
    pub filename: [u8; MAX_FILENAME_LEN],
}

impl FileEntry {
    fn new(name: &str, first_block: u64, payload_len: u64) -> Self {
        let mut entry = Self::zeroed();
        entry.set_name(name);
        entry.block_positions[0] = first_block;
        entry.num_blocks = 1;
        entry.file_size = payload_len;
        entry
    }

    pub fn name(&self) -> String {
        let nul = self.filename.iter().position(|&b| b == 0).unwrap_or(self.filename.len());
        String::from_utf8_lossy(&self.filename[..nul]).into_owned()
    }

    fn set_name(&mut self, name: &str) {
        self.filename = [0u8; MAX_FILENAME_LEN];
        let bytes = name.as_bytes();
        let usable = (MAX_FILENAME_LEN - 1).min(bytes.len());
        self.filename[..usable].copy_from_slice(&bytes[..usable]);
    }

    /// Valid, in-order block offsets for this entry.
    pub fn blocks(&self) -> &[u64] {
        &self.block_positions[..self.num_blocks as usize]
    }

    fn push_block(&mut self, offset: u64) -> Result<(), FatError> {
        if self.num_blocks as usize >= MAX_BLOCKS_PER_FILE {
            return Err(FatError::TooManyBlocks { name: self.name() });
        }
        self.block_positions[self.num_blocks as usize] = offset;
        self.num_blocks += 1;
        Ok(())
    }
}

/// The archive header, written as one contiguous record at offset 0.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Fat {
    pub num_files: u64,
    pub num_free_blocks: u64,
    pub files: [FileEntry; MAX_FILES],
    pub free_blocks: [u64; MAX_FREE_BLOCKS],
}

impl Fat {
    pub const SIZE: usize = std::mem::size_of::<Fat>();

    /// A freshly zeroed FAT with the allocator seeded per §4.3: the single
    /// block right after the header is the only initially-known-free slot.
    pub fn new() -> Self {
        let mut fat = Self::zeroed();
        fat.free_blocks[0] = Self::SIZE as u64;
        fat.num_free_blocks = 1;
        fat
    }

    pub fn to_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FatError> {
        if bytes.len() < Self::SIZE {
            return Err(FatError::HeaderTooShort {
                expected: Self::SIZE,
                found: bytes.len(),
            });
        }
        Ok(*bytemuck::from_bytes(&bytes[..Self::SIZE]))
    }

    /// Load the FAT from offset 0 of an archive.
    pub fn load(device: &mut dyn BlockDevice) -> Result<Self, FatError> {
        let len = device.len()?;
        if len < Self::SIZE as u64 {
            return Err(FatError::HeaderTooShort {
                expected: Self::SIZE,
                found: len as usize,
            });
        }
        let bytes = device.read_at(0, Self::SIZE)?;
        Self::from_bytes(&bytes)
    }

    /// Rewrite the FAT at offset 0.
    pub fn write(&self, device: &mut dyn BlockDevice) -> Result<(), FatError> {
        device.write_at(0, self.to_bytes())?;
        Ok(())
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.files[..self.num_files as usize]
            .iter()
            .position(|e| e.name() == name)
    }

    pub fn entry(&self, index: usize) -> &FileEntry {
        &self.files[index]
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.files[..self.num_files as usize]
    }

    /// §4.4: append `block_position` to the named file's entry, creating a
    /// new entry if this is the first block written for that name.
    /// `payload_len` is the number of real (unpadded) bytes written in this
    /// block, not `BLOCK_SIZE`.
    pub fn record_block(
        &mut self,
        name: &str,
        block_position: u64,
        payload_len: u64,
    ) -> Result<(), FatError> {
        if let Some(idx) = self.find_index(name) {
            let entry = &mut self.files[idx];
            entry.push_block(block_position)?;
            entry.file_size += payload_len;
            return Ok(());
        }

        if self.num_files as usize >= MAX_FILES {
            return Err(FatError::TooManyFiles);
        }
        self.files[self.num_files as usize] = FileEntry::new(name, block_position, payload_len);
        self.num_files += 1;
        Ok(())
    }

    /// §4.5.4: remove the named entry, shifting successors left by one.
    /// Returns the removed entry (its blocks still need to be freed by the
    /// caller via `mark_free`).
    pub fn remove_entry(&mut self, name: &str) -> Result<FileEntry, FatError> {
        let idx = self
            .find_index(name)
            .ok_or_else(|| FatError::FileNotFound(name.to_string()))?;
        let removed = self.files[idx];
        let last = self.num_files as usize - 1;
        for i in idx..last {
            self.files[i] = self.files[i + 1];
        }
        self.files[last] = FileEntry::zeroed();
        self.num_files -= 1;
        Ok(removed)
    }

    /// §4.5.5: reset an existing entry's block list to empty (keeping the
    /// name) so `update` can re-stream into it. Returns the blocks that were
    /// occupied, for the caller to free.
    pub fn reset_entry_for_update(&mut self, name: &str) -> Result<Vec<u64>, FatError> {
        let idx = self
            .find_index(name)
            .ok_or_else(|| FatError::FileNotFound(name.to_string()))?;
        let entry = &mut self.files[idx];
        let freed: Vec<u64> = entry.blocks().to_vec();
        entry.num_blocks = 0;
        entry.file_size = 0;
        entry.block_positions = [0; MAX_BLOCKS_PER_FILE];
        Ok(freed)
    }

    /// §4.3 step 2: first non-zero `free_blocks` slot, consumed in place.
    pub fn allocate(&mut self, device: &mut dyn BlockDevice) -> Result<u64, FatError> {
        loop {
            for i in 0..self.num_free_blocks as usize {
                if self.free_blocks[i] != 0 {
                    let offset = self.free_blocks[i];
                    self.free_blocks[i] = 0;
                    return Ok(offset);
                }
            }
            if self.num_free_blocks as usize >= MAX_FREE_BLOCKS {
                return Err(FatError::FreeListFull);
            }
            let new_offset = device.extend_by_one_block()?;
            self.free_blocks[self.num_free_blocks as usize] = new_offset;
            self.num_free_blocks += 1;
        }
    }

    /// §4.3 `mark_free`: append `offset` to the free list. Errors rather than
    /// panicking if the free list is already at `MAX_FREE_BLOCKS` capacity
    /// (§7: capacity exceeded is fatal to the current operation, not a crash).
    pub fn mark_free(&mut self, offset: u64) -> Result<(), FatError> {
        if self.num_free_blocks as usize >= MAX_FREE_BLOCKS {
            return Err(FatError::FreeListFull);
        }
        self.free_blocks[self.num_free_blocks as usize] = offset;
        self.num_free_blocks += 1;
        Ok(())
    }

    /// §4.5.7 step 4: after defragmentation every block is occupied, so the
    /// free list is empty until the next allocation.
    pub fn clear_free_list(&mut self) {
        self.free_blocks = [0; MAX_FREE_BLOCKS];
        self.num_free_blocks = 0;
    }
}

impl Default for Fat {
    fn default() -> Self {
        Self::new()
    }
}
