//! Block store: the backing file and the memory-mapped FAT.
//!
//! Disk layout:
//! [ FAT region (F blocks, 16-bit little-endian entries) | data blocks ]
//!
//! Entry 0 of the FAT is the superblock `(F << 8) | c` where the block size
//! is `2^(8+c)`; entry 1 is the first block of the root directory. Data
//! block `i` (1-based) starts at byte `(i + F - 1) * block_size`.

use std::cmp;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::process;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{FsError, FsResult};
use crate::param::{MAX_BLOCK_CONFIG, MAX_FAT_BLOCKS, MIN_FAT_BLOCKS};

/// FAT entry of an unreferenced block.
pub const FREE_BLOCK: u16 = 0x0000;

/// FAT entry of the last block of a chain.
pub const LAST_BLOCK: u16 = 0xFFFF;

/// A mounted backing file: raw block I/O plus the memory-mapped FAT.
pub struct Disk {
    file: File,
    fat: MmapMut,
    block_size: usize,
    fat_blocks: usize,
    data_blocks: usize,
    dev_ino: (u64, u64),
}

/// The backing medium failed underneath a metadata write; consistency can
/// no longer be guaranteed, so the host process dies.
fn die(err: io::Error) -> ! {
    log::error!("backing file i/o failed: {}", err);
    eprintln!("OPERATION NOT PERMITTED: {}", err);
    process::exit(1);
}

impl Disk {
    /// Open `path`, read the superblock, and map the FAT region
    /// read-write.
    pub fn mount(path: &str) -> FsResult<Disk> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|_| FsError::NotFound)?;
        let meta = file.metadata().map_err(|_| FsError::NotPermitted)?;
        let mut sb = [0u8; 2];
        file.read_exact_at(&mut sb, 0)
            .map_err(|_| FsError::InvalidArg)?;
        let config = u16::from_le_bytes(sb);
        let block_config = (config & 0xFF) as usize;
        let fat_blocks = (config >> 8) as usize;
        if block_config > MAX_BLOCK_CONFIG
            || fat_blocks < MIN_FAT_BLOCKS
            || fat_blocks > MAX_FAT_BLOCKS
        {
            return Err(FsError::InvalidArg);
        }
        let block_size = 1usize << (8 + block_config);
        let data_blocks = Self::data_block_count(fat_blocks, block_size);
        let fat = unsafe {
            MmapOptions::new()
                .len(fat_blocks * block_size)
                .map_mut(&file)
        }
        .map_err(|_| FsError::NotPermitted)?;
        Ok(Disk {
            fat,
            block_size,
            fat_blocks,
            data_blocks,
            dev_ino: (meta.dev(), meta.ino()),
            file,
        })
    }

    /// Format `path` with `fat_blocks` FAT blocks and block size
    /// `2^(8 + block_config)`. Refuses to format the file backing the
    /// currently mounted filesystem.
    pub fn mkfs(
        path: &str,
        fat_blocks: usize,
        block_config: usize,
        mounted: Option<&Disk>,
    ) -> FsResult<()> {
        if !(MIN_FAT_BLOCKS..=MAX_FAT_BLOCKS).contains(&fat_blocks)
            || block_config > MAX_BLOCK_CONFIG
        {
            return Err(FsError::InvalidArg);
        }
        if let Some(disk) = mounted {
            if disk.same_backing(path) {
                return Err(FsError::Busy);
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|_| FsError::NotPermitted)?;
        let block_size = 1usize << (8 + block_config);
        let data_blocks = Self::data_block_count(fat_blocks, block_size);
        // Superblock, then entry 1: the root directory's only block.
        let superblock = ((fat_blocks as u16) << 8) | block_config as u16;
        file.write_all_at(&superblock.to_le_bytes(), 0)
            .map_err(|_| FsError::NotPermitted)?;
        file.write_all_at(&LAST_BLOCK.to_le_bytes(), 2)
            .map_err(|_| FsError::NotPermitted)?;
        // Zero-extend to the full size; a zeroed root block is a valid
        // empty directory.
        file.set_len(((fat_blocks + data_blocks) * block_size) as u64)
            .map_err(|_| FsError::NotPermitted)?;
        file.sync_all().map_err(|_| FsError::NotPermitted)?;
        Ok(())
    }

    fn data_block_count(fat_blocks: usize, block_size: usize) -> usize {
        cmp::min(fat_blocks * block_size / 2 - 1, LAST_BLOCK as usize - 1)
    }

    /// Flush outstanding FAT and data writes to the backing file.
    pub fn sync(&self) {
        if let Err(err) = self.fat.flush() {
            die(err);
        }
        if let Err(err) = self.file.sync_data() {
            die(err);
        }
    }

    /// Flush and drop the mapping.
    pub fn unmount(self) {
        self.sync();
    }

    /// Does `path` resolve to the object backing this disk?
    pub fn same_backing(&self, path: &str) -> bool {
        fs::metadata(path)
            .map(|m| (m.dev(), m.ino()) == self.dev_ino)
            .unwrap_or(false)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn fat_blocks(&self) -> usize {
        self.fat_blocks
    }

    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    /// FAT entry for `block`.
    pub fn fat_get(&self, block: u16) -> u16 {
        let off = block as usize * 2;
        u16::from_le_bytes([self.fat[off], self.fat[off + 1]])
    }

    pub fn fat_set(&mut self, block: u16, val: u16) {
        let off = block as usize * 2;
        self.fat[off..off + 2].copy_from_slice(&val.to_le_bytes());
    }

    /// Byte offset of data block `block` in the backing file.
    fn block_offset(&self, block: u16) -> u64 {
        (block as u64 + self.fat_blocks as u64 - 1) * self.block_size as u64
    }

    /// Read raw bytes out of data block `block`, starting `off` bytes in.
    pub fn read_at(&self, block: u16, off: usize, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        if let Err(err) = self.file.read_exact_at(buf, self.block_offset(block) + off as u64) {
            die(err);
        }
    }

    /// Write raw bytes into data block `block`, starting `off` bytes in.
    pub fn write_at(&mut self, block: u16, off: usize, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        if let Err(err) = self.file.write_all_at(buf, self.block_offset(block) + off as u64) {
            die(err);
        }
    }
}
