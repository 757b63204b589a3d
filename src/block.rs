//! Block I/O: fixed-size reads/writes at absolute offsets, and the only way
//! to grow an archive (`extend_by_one_block`).
//!
//! Abstracted behind `BlockDevice` so the allocator and operations layers can
//! run against an in-memory backend in tests instead of a real file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Size of a data block, in bytes. Build-time constant per the format spec.
pub const BLOCK_SIZE: usize = 262_144;

/// One fixed-size block of opaque bytes.
#[derive(Clone)]
pub struct Block(pub Box<[u8; BLOCK_SIZE]>);

impl Block {
    pub fn zeroed() -> Self {
        Self(Box::new([0u8; BLOCK_SIZE]))
    }

    /// Build a block from a short payload, zero-padding the trailing bytes.
    pub fn from_payload(payload: &[u8]) -> Self {
        debug_assert!(payload.len() <= BLOCK_SIZE);
        let mut block = Self::zeroed();
        block.0[..payload.len()].copy_from_slice(payload);
        block
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlockIoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("short read at offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead {
        offset: u64,
        expected: usize,
        got: usize,
    },
}

/// Block-granular storage backend for an archive.
pub trait BlockDevice {
    /// Read exactly `BLOCK_SIZE` bytes starting at `offset`.
    fn read_block(&mut self, offset: u64) -> Result<Block, BlockIoError>;

    /// Write exactly `BLOCK_SIZE` bytes at `offset`, overwriting whatever was
    /// there.
    fn write_block(&mut self, offset: u64, block: &Block) -> Result<(), BlockIoError>;

    /// Read an arbitrary byte range (used for the FAT header, which is not
    /// block-sized).
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BlockIoError>;

    /// Write an arbitrary byte range at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), BlockIoError>;

    /// Current length of the underlying storage, in bytes.
    fn len(&mut self) -> Result<u64, BlockIoError>;

    /// Truncate (or extend with zeros) the underlying storage to exactly
    /// `new_len` bytes.
    fn truncate(&mut self, new_len: u64) -> Result<(), BlockIoError>;

    /// Append one zeroed block at the current end of the file and return its
    /// offset. The only way the archive grows.
    fn extend_by_one_block(&mut self) -> Result<u64, BlockIoError> {
        let offset = self.len()?;
        self.truncate(offset + BLOCK_SIZE as u64)?;
        Ok(offset)
    }
}

/// Real file-backed block device.
pub struct FileBlockDevice {
    file: File,
}

impl FileBlockDevice {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, offset: u64) -> Result<Block, BlockIoError> {
        let mut block = Block::zeroed();
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(block.0.as_mut_slice())?;
        Ok(block)
    }

    fn write_block(&mut self, offset: u64, block: &Block) -> Result<(), BlockIoError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(block.as_slice())?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BlockIoError> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), BlockIoError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn len(&mut self) -> Result<u64, BlockIoError> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&mut self, new_len: u64) -> Result<(), BlockIoError> {
        self.file.set_len(new_len)?;
        Ok(())
    }
}

/// In-memory block device for unit/integration tests.
#[derive(Default)]
pub struct MemBlockDevice {
    data: Vec<u8>,
}

impl MemBlockDevice {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    #[cfg(test)]
    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&mut self, offset: u64) -> Result<Block, BlockIoError> {
        let offset = offset as usize;
        let end = offset + BLOCK_SIZE;
        if end > self.data.len() {
            return Err(BlockIoError::ShortRead {
                offset: offset as u64,
                expected: BLOCK_SIZE,
                got: self.data.len().saturating_sub(offset),
            });
        }
        let mut block = Block::zeroed();
        block.0.copy_from_slice(&self.data[offset..end]);
        Ok(block)
    }

    fn write_block(&mut self, offset: u64, block: &Block) -> Result<(), BlockIoError> {
        self.write_at(offset, block.as_slice())
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BlockIoError> {
        let offset = offset as usize;
        let end = offset + len;
        if end > self.data.len() {
            return Err(BlockIoError::ShortRead {
                offset: offset as u64,
                expected: len,
                got: self.data.len().saturating_sub(offset),
            });
        }
        Ok(self.data[offset..end].to_vec())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), BlockIoError> {
        let offset = offset as usize;
        let required = offset + data.len();
        if self.data.len() < required {
            self.data.resize(required, 0);
        }
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn len(&mut self) -> Result<u64, BlockIoError> {
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self, new_len: u64) -> Result<(), BlockIoError> {
        self.data.resize(new_len as usize, 0);
        Ok(())
    }
}
