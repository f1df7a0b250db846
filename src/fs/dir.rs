//! Directory entries and the directory engine: enumerate, find, append,
//! remove.
//!
//! A directory's data blocks hold packed 64-byte entries. The first name
//! byte of a slot is also a sentinel: `0x00` ends the directory, `0x01`
//! marks a deleted entry whose data has been reclaimed, `0x02` a deleted
//! entry whose data is still referenced. Every directory chain is
//! terminated by an EOD slot; `append` allocates a fresh block when an
//! entry would consume the last slot of the chain's last block.

use std::mem;
use std::str;

use zerocopy::byteorder::{LittleEndian, I64, U16, U32};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use super::disk::LAST_BLOCK;
use super::fat::pos_of;
use super::path::AbsPath;
use super::FileSystem;
use crate::error::{FsError, FsResult};

/// name[0] of the slot ending a directory.
pub const EOD: u8 = 0x00;

/// name[0] of a deleted entry whose data has been reclaimed.
pub const CLEANED: u8 = 0x01;

/// name[0] of a deleted entry whose data is still referenced.
pub const REMOVED: u8 = 0x02;

/// Bytes reserved for an entry name, terminator included.
pub const NAMELEN: usize = 32;

/// Size of an on-disk directory entry.
pub const ENTRY_SIZE: usize = mem::size_of::<DirEnt>();

bitflags! {
    /// Permission bits. Execute on a directory gates traversal; write on a
    /// directory gates creating and removing entries in it.
    pub struct Perm: u8 {
        const EXEC = 0x1;
        const READ = 0x2;
        const WRITE = 0x4;
    }
}

/// File types stored in a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    Unknown = 0,
    Regular = 1,
    Directory = 2,
    Link = 4,
}

impl FileKind {
    pub fn from_raw(raw: u8) -> FileKind {
        match raw {
            1 => FileKind::Regular,
            2 => FileKind::Directory,
            4 => FileKind::Link,
            _ => FileKind::Unknown,
        }
    }

    /// Single-letter tag used by `ls`.
    pub fn tag(self) -> char {
        match self {
            FileKind::Unknown => 'u',
            FileKind::Regular => 'f',
            FileKind::Directory => 'd',
            FileKind::Link => 'l',
        }
    }
}

/// An on-disk directory entry: 64 bytes, packed, little-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct DirEnt {
    pub name: [u8; NAMELEN],
    pub size: U32<LittleEndian>,
    pub first_block: U16<LittleEndian>,
    pub typ: u8,
    pub perm: u8,
    pub mtime: I64<LittleEndian>,
    pad: [u8; 16],
}

const_assert_eq!(mem::size_of::<DirEnt>(), 64);

impl DirEnt {
    /// A fresh empty entry named `name`; directories get `rwx`, everything
    /// else `rw`.
    pub fn init(name: &str, kind: FileKind, mtime: i64) -> DirEnt {
        let mut ent = DirEnt::default();
        ent.set_name(name);
        ent.first_block = U16::new(LAST_BLOCK);
        ent.typ = kind as u8;
        ent.perm = if kind == FileKind::Directory {
            (Perm::EXEC | Perm::READ | Perm::WRITE).bits()
        } else {
            (Perm::READ | Perm::WRITE).bits()
        };
        ent.mtime = I64::new(mtime);
        ent
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_raw(self.typ)
    }

    pub fn perm(&self) -> Perm {
        Perm::from_bits_truncate(self.perm)
    }

    /// Live entries are neither EOD slots nor deleted ones.
    pub fn is_live(&self) -> bool {
        !matches!(self.name[0], EOD | CLEANED | REMOVED)
    }

    pub fn name_str(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAMELEN);
        str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    /// Fill in the name, truncating to NAMELEN-1 bytes and NUL-padding.
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAMELEN - 1);
        self.name = [0; NAMELEN];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }
}

/// Where a directory slot lives: FAT-addressed block plus byte offset
/// inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPos {
    pub block: u16,
    pub off: usize,
}

/// A directory slot paired with its location. The root directory is not
/// stored in any slot, so its location is `None`.
#[derive(Clone)]
pub struct Slot {
    pub ent: DirEnt,
    pub pos: Option<SlotPos>,
}

/// Link-following policy for entry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// Return link entries as-is.
    None,
    /// Follow links but keep the last existing entry of a dangling chain.
    ToLast,
    /// Always follow; a dangling chain resolves to its missing target.
    All,
}

impl FileSystem {
    /// The in-memory pseudo-entry for the root directory: block 1, `rwx`.
    pub(super) fn root_slot(&self) -> Slot {
        let mut ent = DirEnt::init("/", FileKind::Directory, 0);
        ent.first_block = U16::new(1);
        Slot { ent, pos: None }
    }

    /// Enumerate every slot of the directory chain starting at `block`,
    /// EOD slot included.
    pub(super) fn enum_dir(&self, block: u16) -> Vec<(DirEnt, SlotPos)> {
        let bs = self.disk.block_size();
        let per_block = bs / ENTRY_SIZE;
        let mut out = Vec::new();
        let mut block = block;
        while block != LAST_BLOCK {
            for i in 0..per_block {
                let mut ent = DirEnt::default();
                self.disk
                    .read_at(block, i * ENTRY_SIZE, ent.as_bytes_mut());
                let pos = SlotPos {
                    block,
                    off: i * ENTRY_SIZE,
                };
                let end = ent.name[0] == EOD;
                out.push((ent, pos));
                if end {
                    return out;
                }
            }
            block = self.disk.fat_get(block);
        }
        out
    }

    /// Read a link's target path out of its data bytes.
    pub(super) fn read_link(&self, ent: &DirEnt) -> AbsPath {
        let mut buf = vec![0u8; ent.size.get() as usize];
        let pos = pos_of(ent.first_block.get(), self.disk.block_size());
        let n = self.disk.read_chain(pos, &mut buf);
        buf.truncate(n);
        if let Some(nul) = buf.iter().position(|&b| b == 0) {
            buf.truncate(nul);
        }
        let target = String::from_utf8_lossy(&buf).into_owned();
        AbsPath::resolve(&AbsPath::root(), &target)
    }

    /// Find `name` in the directory chain starting at `block`.
    ///
    /// `None` as the name asks for the first reusable slot (EOD or
    /// deleted). A miss returns the terminal EOD slot; the caller tells
    /// the cases apart through `DirEnt::is_live`. Link entries recurse
    /// according to `follow`.
    pub(super) fn find_entry(&self, block: u16, name: Option<&str>, follow: Follow) -> Slot {
        let entries = self.enum_dir(block);
        if entries.is_empty() {
            return Slot {
                ent: DirEnt::default(),
                pos: None,
            };
        }
        let name = match name {
            None => {
                for (ent, pos) in &entries {
                    if matches!(ent.name[0], EOD | CLEANED | REMOVED) {
                        return Slot {
                            ent: *ent,
                            pos: Some(*pos),
                        };
                    }
                }
                // Unreachable on a well-formed directory: the EOD slot
                // always matches above.
                let (ent, pos) = entries[entries.len() - 1];
                return Slot {
                    ent,
                    pos: Some(pos),
                };
            }
            Some(name) => name,
        };
        for (ent, pos) in &entries {
            if ent.name[0] == EOD {
                break;
            }
            if !ent.is_live() || ent.name_str() != name {
                continue;
            }
            let mut found = Slot {
                ent: *ent,
                pos: Some(*pos),
            };
            if ent.kind() == FileKind::Link && follow != Follow::None {
                let target = self.read_link(ent);
                let (dir, tname) = target.split();
                match self.find_dir(dir) {
                    Ok(d) if d.ent.kind() == FileKind::Directory => {
                        let next =
                            self.find_entry(d.ent.first_block.get(), tname, follow);
                        if follow == Follow::All || next.ent.is_live() {
                            found = next;
                        }
                    }
                    // Broken target path: hand back the link itself.
                    _ => {}
                }
            }
            return found;
        }
        let (ent, pos) = entries[entries.len() - 1];
        Slot {
            ent,
            pos: Some(pos),
        }
    }

    /// Resolve a sequence of nested directory names to the innermost one,
    /// following links all the way.
    pub(super) fn find_dir(&self, dir: &[String]) -> FsResult<Slot> {
        let mut cur = self.root_slot();
        for name in dir {
            let ent = self.find_entry(cur.ent.first_block.get(), Some(name.as_str()), Follow::All);
            if !ent.ent.is_live() {
                return Err(FsError::NotFound);
            }
            if ent.ent.kind() != FileKind::Directory {
                return Err(FsError::NotDir);
            }
            if !ent.ent.perm().contains(Perm::EXEC) {
                return Err(FsError::PermDenied);
            }
            cur = ent;
        }
        Ok(cur)
    }

    /// Write `ent` into the first reusable slot of the directory starting
    /// at `dir_block`, keeping the EOD invariant: when the slot is the
    /// last of the chain's last block, a fresh (zeroed) block is chained
    /// on first.
    pub(super) fn append_entry(&mut self, dir_block: u16, ent: &DirEnt) -> FsResult<SlotPos> {
        let slot = self.find_entry(dir_block, None, Follow::All);
        let pos = slot.pos.ok_or(FsError::NotPermitted)?;
        if pos.off + ENTRY_SIZE == self.disk.block_size()
            && self.disk.fat_get(pos.block) == LAST_BLOCK
        {
            let _ = self.disk.allocate(pos.block)?;
        }
        self.disk.write_at(pos.block, pos.off, ent.as_bytes());
        self.disk.sync();
        Ok(pos)
    }

    /// Overwrite the slot at `pos` with `ent`. The root pseudo-entry has
    /// no slot; updates to it are dropped.
    pub(super) fn write_slot(&mut self, pos: Option<SlotPos>, ent: &DirEnt) {
        if let Some(pos) = pos {
            self.disk.write_at(pos.block, pos.off, ent.as_bytes());
            self.disk.sync();
        }
    }

    /// Stamp the name-sentinel byte of the slot at `pos`.
    pub(super) fn stamp(&mut self, pos: SlotPos, sentinel: u8) {
        self.disk.write_at(pos.block, pos.off, &[sentinel]);
        self.disk.sync();
    }
}
