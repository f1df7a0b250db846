//! Filesystem implementation. Four layers:
//!   + Disk: the backing file and the memory-mapped FAT.
//!   + Chains: FAT allocation and byte transfer across linked blocks.
//!   + Directories: 64-byte entries, sentinel names, link resolution.
//!   + Operations: create/read/write/truncate/remove/list over paths.
//!
//! Every metadata mutation is followed by a durable sync of the backing
//! file before the operation returns. There is no journaling; a crash
//! between two syncs may leave an entry's sentinel disagreeing with its
//! chain.

pub mod dir;
pub mod disk;
pub mod fat;
pub mod path;

use std::cmp;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::byteorder::{I64, U16, U32};

pub use dir::{DirEnt, FileKind, Follow, Perm, SlotPos};
pub use disk::Disk;
pub use path::AbsPath;

use dir::REMOVED;
use disk::LAST_BLOCK;
use fat::pos_of;

use crate::error::{FsError, FsResult};

/// Seconds since the epoch, for entry mtimes.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A mounted filesystem plus the kernel-wide working directory.
pub struct FileSystem {
    disk: Disk,
    cwd: AbsPath,
}

impl FileSystem {
    pub fn mount(path: &str) -> FsResult<FileSystem> {
        Ok(FileSystem {
            disk: Disk::mount(path)?,
            cwd: AbsPath::root(),
        })
    }

    pub fn unmount(self) {
        self.disk.unmount();
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    pub fn disk_mut(&mut self) -> &mut Disk {
        &mut self.disk
    }

    pub fn cwd(&self) -> &AbsPath {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: AbsPath) {
        self.cwd = cwd;
    }

    /// Normalize `name` against the working directory.
    pub fn abs(&self, name: &str) -> AbsPath {
        AbsPath::resolve(&self.cwd, name)
    }

    /// Resolve `path` to its directory slot. `follow` applies to the final
    /// component only; the directory walk always follows links.
    fn find_slot(&self, path: &AbsPath, follow: Follow) -> FsResult<dir::Slot> {
        let (dir, name) = path.split();
        let parent = self.find_dir(dir)?;
        match name {
            None => Ok(self.root_slot()),
            Some(name) => {
                let slot = self.find_entry(parent.ent.first_block.get(), Some(name), follow);
                if slot.ent.is_live() {
                    Ok(slot)
                } else {
                    Err(FsError::NotFound)
                }
            }
        }
    }

    /// Create an empty file of the given kind at `path`.
    ///
    /// The parent must exist, be a directory, and be writable. A live
    /// target fails with `Exists` unless it is a link resolving to a
    /// missing file, in which case that target is created as a regular
    /// file. Fresh directories immediately allocate one data block so
    /// their EOD slot exists.
    pub fn create(&mut self, path: &AbsPath, kind: FileKind) -> FsResult<()> {
        let (dir, name) = path.split();
        let name = match name {
            Some(name) => name,
            None => return Err(FsError::Exists),
        };
        let parent = self.find_dir(dir)?;
        if !parent.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        let existing = self.find_entry(parent.ent.first_block.get(), Some(name), Follow::ToLast);
        if existing.ent.is_live() {
            if existing.ent.kind() == FileKind::Link {
                // Dangling link: create its target instead.
                let target = self.read_link(&existing.ent);
                return self.create(&target, FileKind::Regular);
            }
            return Err(FsError::Exists);
        }
        let mut ent = DirEnt::init(name, kind, now());
        if kind == FileKind::Directory {
            let block = self.disk.allocate(0)?;
            ent.first_block = U16::new(block);
        }
        if let Err(err) = self.append_entry(parent.ent.first_block.get(), &ent) {
            if kind == FileKind::Directory {
                self.disk.free_chain(ent.first_block.get());
            }
            return Err(err);
        }
        let mut pent = parent.ent;
        pent.size = U32::new(pent.size.get() + dir::ENTRY_SIZE as u32);
        pent.mtime = I64::new(now());
        self.write_slot(parent.pos, &pent);
        Ok(())
    }

    /// A copy of the directory entry at `path`.
    pub fn get_meta(&self, path: &AbsPath, follow: bool) -> FsResult<DirEnt> {
        let follow = if follow { Follow::All } else { Follow::None };
        Ok(self.find_slot(path, follow)?.ent)
    }

    /// Overwrite the directory slot at `path` with `ent`. The caller is
    /// trusted to preserve the name field; used for chmod and rename.
    pub fn set_meta(&mut self, path: &AbsPath, ent: &DirEnt, follow: bool) -> FsResult<()> {
        let follow = if follow { Follow::All } else { Follow::None };
        let slot = self.find_slot(path, follow)?;
        self.write_slot(slot.pos, ent);
        Ok(())
    }

    /// Read up to `buf.len()` bytes starting at `offset`; returns the
    /// bytes actually read, which is short at end-of-file.
    pub fn read(&self, path: &AbsPath, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let slot = self.find_slot(path, Follow::All)?;
        if slot.ent.kind() == FileKind::Directory {
            return Err(FsError::IsDir);
        }
        if !slot.ent.perm().contains(Perm::READ) {
            return Err(FsError::PermDenied);
        }
        let size = slot.ent.size.get() as usize;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let n = cmp::min(buf.len(), size - offset);
        let start = pos_of(slot.ent.first_block.get(), self.disk.block_size());
        let start = match self.disk.seek_within(start, offset) {
            Some(pos) => pos,
            None => return Ok(0),
        };
        Ok(self.disk.read_chain(start, &mut buf[..n]))
    }

    /// Write `buf` at `offset`, extending the file as needed and bumping
    /// its mtime. The target must not be a directory; both the target and
    /// its parent need the write bit.
    pub fn write(
        &mut self,
        path: &AbsPath,
        offset: usize,
        buf: &[u8],
        follow: bool,
    ) -> FsResult<()> {
        let follow = if follow { Follow::All } else { Follow::None };
        let (dir, _) = path.split();
        let parent = self.find_dir(dir)?;
        if !parent.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        let mut slot = self.find_slot(path, follow)?;
        if slot.ent.kind() == FileKind::Directory {
            return Err(FsError::IsDir);
        }
        if !slot.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        if slot.ent.size.get() == 0 && !buf.is_empty() {
            let block = self.disk.allocate(0)?;
            slot.ent.first_block = U16::new(block);
        }
        if offset + buf.len() > slot.ent.size.get() as usize {
            slot.ent.size = U32::new((offset + buf.len()) as u32);
        }
        slot.ent.mtime = I64::new(now());
        self.write_slot(slot.pos, &slot.ent);
        if slot.ent.first_block.get() == LAST_BLOCK {
            // Zero-length write to an empty file: mtime bump only.
            return Ok(());
        }
        let start = pos_of(slot.ent.first_block.get(), self.disk.block_size());
        let start = self.disk.seek(start, offset)?;
        self.disk.write_chain(start, buf)
    }

    /// Free the file's chain and reset it to empty. Truncating a
    /// directory is a no-op when empty and `NotEmpty` otherwise.
    pub fn truncate(&mut self, path: &AbsPath, follow: bool) -> FsResult<()> {
        let follow = if follow { Follow::All } else { Follow::None };
        let (dir, _) = path.split();
        let parent = self.find_dir(dir)?;
        if !parent.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        let mut slot = self.find_slot(path, follow)?;
        if !slot.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        if slot.ent.kind() == FileKind::Directory {
            if slot.ent.size.get() > 0 {
                return Err(FsError::NotEmpty);
            }
            return Ok(());
        }
        self.disk.free_chain(slot.ent.first_block.get());
        slot.ent.size = U32::new(0);
        slot.ent.first_block = U16::new(LAST_BLOCK);
        self.write_slot(slot.pos, &slot.ent);
        Ok(())
    }

    /// Delete the entry at `path`: the name sentinel becomes `0x02` (data
    /// still live) and the parent's size and mtime are updated. Returns
    /// the slot position for a later `cleanup`.
    pub fn remove(&mut self, path: &AbsPath) -> FsResult<SlotPos> {
        let (dir, name) = path.split();
        let name = match name {
            Some(name) => name,
            None => return Err(FsError::NotPermitted),
        };
        let parent = self.find_dir(dir)?;
        if !parent.ent.perm().contains(Perm::WRITE) {
            return Err(FsError::PermDenied);
        }
        let slot = self.find_entry(parent.ent.first_block.get(), Some(name), Follow::None);
        if !slot.ent.is_live() {
            return Err(FsError::NotFound);
        }
        let pos = slot.pos.ok_or(FsError::NotPermitted)?;
        let mut pent = parent.ent;
        pent.size = U32::new(pent.size.get().saturating_sub(dir::ENTRY_SIZE as u32));
        pent.mtime = I64::new(now());
        self.write_slot(parent.pos, &pent);
        self.stamp(pos, REMOVED);
        Ok(pos)
    }

    /// Mark a removed entry's data as reclaimed (`0x01`), making the slot
    /// fully reusable.
    pub fn cleanup(&mut self, pos: SlotPos) {
        self.stamp(pos, dir::CLEANED);
    }

    /// The live entries of the directory at `path`, in enumeration order.
    pub fn list(&self, path: &AbsPath) -> FsResult<Vec<DirEnt>> {
        let (dir, name) = path.split();
        let parent = self.find_dir(dir)?;
        let target = match name {
            None => parent,
            Some(name) => {
                let slot = self.find_entry(parent.ent.first_block.get(), Some(name), Follow::All);
                if !slot.ent.is_live() {
                    return Err(FsError::NotFound);
                }
                if slot.ent.kind() != FileKind::Directory {
                    return Err(FsError::NotDir);
                }
                if !slot.ent.perm().contains(Perm::READ) {
                    return Err(FsError::PermDenied);
                }
                slot
            }
        };
        Ok(self
            .enum_dir(target.ent.first_block.get())
            .into_iter()
            .map(|(ent, _)| ent)
            .filter(|ent| ent.is_live())
            .collect())
    }

    /// Rename or move `src` to `dst`. A directory destination receives
    /// the source as a child under its original final component; any
    /// other destination is truncated and replaced. A directory source
    /// cannot replace a non-directory.
    pub fn rename(&mut self, src: &AbsPath, dst: &AbsPath) -> FsResult<()> {
        let src_ent = self.get_meta(src, false)?;
        let dst_is_dir = matches!(
            self.get_meta(dst, false),
            Ok(ent) if ent.kind() == FileKind::Directory
        );
        let (dst_path, new_name) = if dst_is_dir {
            let name = src.file_name().ok_or(FsError::NotPermitted)?;
            (dst.join(name), name.to_string())
        } else {
            let name = dst.file_name().ok_or(FsError::NotPermitted)?;
            (dst.clone(), name.to_string())
        };
        let mut moved = src_ent;
        moved.set_name(&new_name);
        match self.create(&dst_path, src_ent.kind()) {
            Ok(()) => {
                if src_ent.kind() == FileKind::Directory {
                    // The placeholder allocated a block; the source brings
                    // its own chain.
                    let fresh = self.get_meta(&dst_path, false)?;
                    if fresh.first_block.get() != LAST_BLOCK {
                        self.disk.free_chain(fresh.first_block.get());
                    }
                }
            }
            Err(FsError::Exists) => {
                let dest = self.get_meta(&dst_path, false)?;
                if dest.kind() != FileKind::Directory && src_ent.kind() == FileKind::Directory {
                    return Err(FsError::IsDir);
                }
                self.truncate(&dst_path, false)?;
            }
            Err(err) => return Err(err),
        }
        self.set_meta(&dst_path, &moved, false)?;
        let pos = self.remove(src)?;
        self.cleanup(pos);
        Ok(())
    }
}
