//! The six archive operations, each a transaction over a `BlockDevice` and a
//! `Fat`: `create`, `extract`, `list`, `delete`, `update`, `append`,
//! `defragment`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::block::{Block, BlockDevice, BlockIoError, BLOCK_SIZE};
use crate::fat::{Fat, FatError, STDIN_NAME};

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Fat(#[from] FatError),
    #[error(transparent)]
    BlockIo(#[from] BlockIoError),
    #[error("could not open archive {path}: {source}")]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not open input {path}: {source}")]
    OpenInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Names under which delete/update reported a missing entry, surfaced to the
/// caller so the CLI can log them without flipping the exit code (§7).
pub type NotFound = Vec<String>;

/// Stream one input (an opened reader plus the name it will be recorded
/// under) through the allocator in `BLOCK_SIZE` chunks, recording each block
/// against `name` in `fat`. Shared by `create`, `append`, and `update`.
fn stream_into(
    fat: &mut Fat,
    device: &mut dyn BlockDevice,
    name: &str,
    mut reader: impl Read,
) -> Result<(), OperationError> {
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let offset = fat.allocate(device)?;
        let block = Block::from_payload(&buf[..filled]);
        device.write_block(offset, &block)?;
        fat.record_block(name, offset, filled as u64)?;
        trace!(name = %name, offset, payload = filled, "wrote block");

        if filled < BLOCK_SIZE {
            break;
        }
    }
    Ok(())
}

impl From<std::io::Error> for OperationError {
    fn from(source: std::io::Error) -> Self {
        OperationError::BlockIo(BlockIoError::Io(source))
    }
}

fn open_archive_rw(path: &Path) -> Result<File, OperationError> {
    File::options()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| OperationError::OpenArchive {
            path: path.to_path_buf(),
            source,
        })
}

fn create_archive(path: &Path) -> Result<File, OperationError> {
    File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| OperationError::OpenArchive {
            path: path.to_path_buf(),
            source,
        })
}

/// §4.5.1: create a new archive from `inputs` (file paths) or standard input.
pub fn create(
    archive_path: &Path,
    inputs: &[PathBuf],
    device: &mut dyn BlockDevice,
) -> Result<Fat, OperationError> {
    let _ = archive_path; // device already open/truncated by the caller
    let mut fat = Fat::new();
    fat.write(device)?;
    info!(count = inputs.len(), "creating archive");

    if inputs.is_empty() {
        let stdin = std::io::stdin();
        stream_into(&mut fat, device, STDIN_NAME, stdin.lock())?;
    } else {
        for path in inputs {
            let name = file_name_str(path);
            let file = File::open(path).map_err(|source| OperationError::OpenInput {
                path: path.to_path_buf(),
                source,
            })?;
            stream_into(&mut fat, device, &name, file)?;
            debug!(name = %name, "added input to archive");
        }
    }

    fat.write(device)?;
    Ok(fat)
}

/// §4.5.2: extract every file in `fat` into the current directory.
pub fn extract(fat: &Fat, device: &mut dyn BlockDevice) -> Result<(), OperationError> {
    for entry in fat.entries() {
        let name = entry.name();
        let mut out = match File::create(&name) {
            Ok(f) => f,
            Err(err) => {
                warn!(name = %name, %err, "could not create output file, skipping");
                continue;
            }
        };

        let mut remaining = entry.file_size;
        for &offset in entry.blocks() {
            let block = device.read_block(offset)?;
            let take = (BLOCK_SIZE as u64).min(remaining) as usize;
            out.write_all(&block.as_slice()[..take])?;
            remaining -= take as u64;
        }
        debug!(name = %name, size = entry.file_size, "extracted file");
    }
    Ok(())
}

/// §4.5.3: print `filename\tsize bytes` per entry, plus block offsets when
/// `verbose`.
pub fn list(fat: &Fat, verbose: bool, mut out: impl Write) -> std::io::Result<()> {
    for entry in fat.entries() {
        writeln!(out, "{}\t{} bytes", entry.name(), entry.file_size)?;
        if verbose {
            for &offset in entry.blocks() {
                writeln!(out, "  {offset}")?;
            }
        }
    }
    Ok(())
}

/// §4.5.4: delete each named entry, freeing its blocks. Names with no match
/// are returned (not an error) so the caller can report them per §7.
pub fn delete(
    fat: &mut Fat,
    device: &mut dyn BlockDevice,
    names: &[String],
) -> Result<NotFound, OperationError> {
    let mut not_found = Vec::new();
    for name in names {
        match fat.remove_entry(name) {
            Ok(removed) => {
                for &offset in removed.blocks() {
                    fat.mark_free(offset)?;
                }
                info!(name = %name, "deleted file");
            }
            Err(FatError::FileNotFound(_)) => {
                warn!(name = %name, "not found, skipping");
                not_found.push(name.clone());
            }
            Err(err) => return Err(err.into()),
        }
    }
    fat.write(device)?;
    Ok(not_found)
}

/// §4.5.5: replace each named entry's contents with the current on-disk
/// contents of a same-named host file. Entries missing from the archive, and
/// entries whose backing host file can't be opened, are both reported back
/// as `NotFound` (§7: per-file errors are local and non-fatal here) rather
/// than aborting the whole operation.
pub fn update(
    fat: &mut Fat,
    device: &mut dyn BlockDevice,
    names: &[String],
) -> Result<NotFound, OperationError> {
    let mut not_found = Vec::new();
    for name in names {
        match fat.reset_entry_for_update(name) {
            Ok(freed) => {
                for offset in freed {
                    fat.mark_free(offset)?;
                }
                match File::open(name) {
                    Ok(file) => {
                        stream_into(fat, device, name, file)?;
                        info!(name = %name, "updated file");
                    }
                    Err(err) => {
                        warn!(name = %name, %err, "could not open input, skipping");
                        not_found.push(name.clone());
                    }
                }
            }
            Err(FatError::FileNotFound(_)) => {
                warn!(name = %name, "not found, skipping");
                not_found.push(name.clone());
            }
            Err(err) => return Err(err.into()),
        }
    }
    fat.write(device)?;
    Ok(not_found)
}

/// §4.5.6: append files (or standard input) to an existing archive,
/// preserving all current entries.
pub fn append(
    fat: &mut Fat,
    device: &mut dyn BlockDevice,
    inputs: &[PathBuf],
) -> Result<(), OperationError> {
    if inputs.is_empty() {
        let stdin = std::io::stdin();
        stream_into(fat, device, STDIN_NAME, stdin.lock())?;
    } else {
        for path in inputs {
            let name = file_name_str(path);
            match File::open(path) {
                Ok(file) => {
                    stream_into(fat, device, &name, file)?;
                    debug!(name = %name, "appended to archive");
                }
                Err(err) => {
                    warn!(name = %name, %err, "could not open input, skipping");
                }
            }
        }
    }
    fat.write(device)?;
    Ok(())
}

/// §4.5.7: relocate every occupied block to a dense prefix, truncate the
/// tail, and reset the free list.
pub fn defragment(fat: &mut Fat, device: &mut dyn BlockDevice) -> Result<(), OperationError> {
    let mut cursor = Fat::SIZE as u64;
    let num_files = fat.num_files as usize;

    for file_idx in 0..num_files {
        let num_blocks = fat.files[file_idx].num_blocks as usize;
        for block_idx in 0..num_blocks {
            let source = fat.files[file_idx].block_positions[block_idx];
            if source != cursor {
                let buffered = device.read_block(source)?;
                device.write_block(cursor, &buffered)?;
                fat.files[file_idx].block_positions[block_idx] = cursor;
            }
            cursor += BLOCK_SIZE as u64;
        }
    }

    fat.clear_free_list();
    device.truncate(cursor)?;
    fat.write(device)?;
    info!(new_len = cursor, "defragmented archive");
    Ok(())
}

fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Open (or create) the archive file at `path` for a mutating operation and
/// wrap it in a `BlockDevice`. `create_new` truncates any existing archive.
pub fn open_device(
    path: &Path,
    create_new: bool,
) -> Result<crate::block::FileBlockDevice, OperationError> {
    let file = if create_new {
        create_archive(path)?
    } else {
        open_archive_rw(path)?
    };
    Ok(crate::block::FileBlockDevice::new(file))
}

/// Remove a stale archive at `path` first if it exists; `create` always
/// starts from a truncated file per §4.5.1 step 1.
pub fn ensure_fresh(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    fn small_fat_and_device(payload: &[u8], name: &str) -> (Fat, MemBlockDevice) {
        let mut device = MemBlockDevice::new();
        let mut fat = Fat::new();
        fat.write(&mut device).unwrap();
        stream_into(&mut fat, &mut device, name, payload).unwrap();
        fat.write(&mut device).unwrap();
        (fat, device)
    }

    #[test]
    fn stream_into_single_short_block() {
        let (fat, _device) = small_fat_and_device(b"hello", "a.txt");
        assert_eq!(fat.num_files, 1);
        let entry = fat.entry(0);
        assert_eq!(entry.file_size, 5);
        assert_eq!(entry.num_blocks, 1);
    }

    #[test]
    fn stream_into_multi_block_file() {
        let payload = vec![7u8; 600_000];
        let (fat, _device) = small_fat_and_device(&payload, "big.bin");
        let entry = fat.entry(0);
        assert_eq!(entry.file_size, 600_000);
        assert_eq!(entry.num_blocks, 3);
    }

    #[test]
    fn list_formats_name_and_size() {
        let (fat, _device) = small_fat_and_device(b"hello", "a.txt");
        let mut out = Vec::new();
        list(&fat, false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a.txt\t5 bytes\n");
    }

    #[test]
    fn list_verbose_includes_block_offsets() {
        let (fat, _device) = small_fat_and_device(b"hello", "a.txt");
        let mut out = Vec::new();
        list(&fat, true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("a.txt\t5 bytes"));
        assert!(text.contains(&Fat::SIZE.to_string()));
    }

    #[test]
    fn delete_frees_blocks_and_removes_entry() {
        let (mut fat, mut device) = small_fat_and_device(b"hello", "a.txt");
        let freed_offset = fat.entry(0).blocks()[0];

        let not_found = delete(&mut fat, &mut device, &["a.txt".to_string()]).unwrap();
        assert!(not_found.is_empty());
        assert_eq!(fat.num_files, 0);
        assert!(fat.free_blocks[..fat.num_free_blocks as usize].contains(&freed_offset));
    }

    #[test]
    fn delete_missing_name_is_reported_not_errored() {
        let (mut fat, mut device) = small_fat_and_device(b"hello", "a.txt");
        let not_found = delete(&mut fat, &mut device, &["missing.txt".to_string()]).unwrap();
        assert_eq!(not_found, vec!["missing.txt".to_string()]);
        assert_eq!(fat.num_files, 1);
    }

    #[test]
    fn defragment_compacts_after_delete() {
        let mut device = MemBlockDevice::new();
        let mut fat = Fat::new();
        fat.write(&mut device).unwrap();
        stream_into(&mut fat, &mut device, "a.txt", &b"aaaaa"[..]).unwrap();
        stream_into(&mut fat, &mut device, "b.txt", &vec![1u8; 300_000][..]).unwrap();
        stream_into(&mut fat, &mut device, "c.txt", &b"ccccc"[..]).unwrap();
        fat.write(&mut device).unwrap();

        delete(&mut fat, &mut device, &["b.txt".to_string()]).unwrap();
        defragment(&mut fat, &mut device).unwrap();

        assert_eq!(fat.num_free_blocks, 0);
        assert_eq!(
            device.len().unwrap(),
            Fat::SIZE as u64 + 2 * BLOCK_SIZE as u64
        );

        let mut out = Vec::new();
        list(&fat, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("a.txt\t5 bytes"));
        assert!(text.contains("c.txt\t5 bytes"));
        assert!(!text.contains("b.txt"));
    }

    #[test]
    fn update_replaces_contents_and_frees_old_blocks() {
        let mut device = MemBlockDevice::new();
        let mut fat = Fat::new();
        fat.write(&mut device).unwrap();
        stream_into(&mut fat, &mut device, "a.txt", &b"0123456789"[..]).unwrap();
        fat.write(&mut device).unwrap();
        let old_offset = fat.entry(0).blocks()[0];

        fat.reset_entry_for_update("a.txt").unwrap();
        stream_into(&mut fat, &mut device, "a.txt", &vec![9u8; 300_000][..]).unwrap();
        fat.write(&mut device).unwrap();

        let entry = fat.entry(0);
        assert_eq!(entry.file_size, 300_000);
        assert_eq!(entry.num_blocks, 2);
        assert_ne!(entry.blocks()[0], old_offset);
    }
}
