//! Per-process file descriptor tables and the descriptor syscall surface.
//!
//! Descriptors 0/1/2 pass through to host stdio; everything at or above
//! `FIRST_FD` resolves through the owning process's table. Each entry
//! holds the backing path, the open mode, and a cursor advanced by every
//! transfer.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::error::{FsError, FsResult};
use crate::fs::path::AbsPath;
use crate::fs::FileKind;
use crate::param::FIRST_FD;
use crate::proc::ProcCtx;

pub type Fd = i32;

/// Descriptor open mode. Write truncates on open; Append starts at
/// end-of-file; Read requires the file to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// An open file: backing path, mode, and cursor.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub path: AbsPath,
    pub mode: OpenMode,
    pub pos: usize,
}

/// Descriptor table keyed by small integers ≥ `FIRST_FD`.
#[derive(Debug, Default)]
pub struct FdTable {
    entries: BTreeMap<Fd, OpenFile>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable {
            entries: BTreeMap::new(),
        }
    }

    /// Insert under the smallest unused descriptor.
    pub fn insert(&mut self, open: OpenFile) -> Fd {
        let mut fd = FIRST_FD;
        while self.entries.contains_key(&fd) {
            fd += 1;
        }
        let _ = self.entries.insert(fd, open);
        fd
    }

    /// Insert under a specific descriptor (spawn-time duplication).
    pub fn insert_at(&mut self, fd: Fd, open: OpenFile) {
        let _ = self.entries.insert(fd, open);
    }

    pub fn get(&self, fd: Fd) -> Option<&OpenFile> {
        self.entries.get(&fd)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut OpenFile> {
        self.entries.get_mut(&fd)
    }

    pub fn close(&mut self, fd: Fd) -> Option<OpenFile> {
        self.entries.remove(&fd)
    }
}

impl ProcCtx {
    /// Open `name` (resolved against the working directory) and allocate
    /// the smallest unused descriptor.
    pub fn open(&self, name: &str, mode: OpenMode) -> FsResult<Fd> {
        let open = self.kernel.with_fs(|fs| {
            let path = fs.abs(name);
            let pos = match mode {
                OpenMode::Read => {
                    let _ = fs.get_meta(&path, true)?;
                    0
                }
                OpenMode::Write => {
                    match fs.create(&path, FileKind::Regular) {
                        Ok(()) | Err(FsError::Exists) => {}
                        Err(err) => return Err(err),
                    }
                    fs.truncate(&path, true)?;
                    0
                }
                OpenMode::Append => {
                    match fs.create(&path, FileKind::Regular) {
                        Ok(()) | Err(FsError::Exists) => {}
                        Err(err) => return Err(err),
                    }
                    fs.get_meta(&path, true)?.size.get() as usize
                }
            };
            Ok(OpenFile { path, mode, pos })
        })?;
        let mut st = self.kernel.state.lock().unwrap();
        let p = st
            .table
            .get_mut(&self.pid)
            .ok_or(FsError::NotPermitted)?;
        Ok(p.fds.insert(open))
    }

    /// Close a descriptor; the pass-through descriptors are never closed.
    pub fn close(&self, fd: Fd) -> FsResult<()> {
        if fd < FIRST_FD {
            return Ok(());
        }
        let mut st = self.kernel.state.lock().unwrap();
        let p = st
            .table
            .get_mut(&self.pid)
            .ok_or(FsError::NotPermitted)?;
        match p.fds.close(fd) {
            Some(_) => Ok(()),
            None => Err(FsError::InvalidArg),
        }
    }

    /// Read through a descriptor, advancing its cursor. Descriptors below
    /// `FIRST_FD` read host stdin.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        if fd < FIRST_FD {
            return Ok(self.read_host_stdin(buf));
        }
        let (path, pos) = {
            let st = self.kernel.state.lock().unwrap();
            let open = st
                .table
                .get(&self.pid)
                .and_then(|p| p.fds.get(fd))
                .ok_or(FsError::InvalidArg)?;
            if open.mode != OpenMode::Read {
                return Err(FsError::InvalidArg);
            }
            (open.path.clone(), open.pos)
        };
        let n = self.kernel.with_fs(|fs| fs.read(&path, pos, buf))?;
        let mut st = self.kernel.state.lock().unwrap();
        if let Some(open) = st.table.get_mut(&self.pid).and_then(|p| p.fds.get_mut(fd)) {
            open.pos += n;
        }
        Ok(n)
    }

    /// Write through a descriptor, advancing its cursor. Descriptors
    /// below `FIRST_FD` write host stdout/stderr.
    pub fn write(&self, fd: Fd, buf: &[u8]) -> FsResult<usize> {
        if fd < FIRST_FD {
            let res = if fd == 2 {
                io::stderr().write_all(buf)
            } else {
                let mut out = io::stdout();
                out.write_all(buf).and_then(|_| out.flush())
            };
            return match res {
                Ok(()) => Ok(buf.len()),
                Err(_) => Err(FsError::NotPermitted),
            };
        }
        let (path, pos) = {
            let st = self.kernel.state.lock().unwrap();
            let open = st
                .table
                .get(&self.pid)
                .and_then(|p| p.fds.get(fd))
                .ok_or(FsError::InvalidArg)?;
            if open.mode == OpenMode::Read {
                return Err(FsError::InvalidArg);
            }
            (open.path.clone(), open.pos)
        };
        self.kernel.with_fs(|fs| fs.write(&path, pos, buf, true))?;
        let mut st = self.kernel.state.lock().unwrap();
        if let Some(open) = st.table.get_mut(&self.pid).and_then(|p| p.fds.get_mut(fd)) {
            open.pos += buf.len();
        }
        Ok(buf.len())
    }

    /// Poll the stdin pump, yielding a tick between polls so the
    /// simulation keeps running while the caller waits for input.
    fn read_host_stdin(&self, buf: &mut [u8]) -> usize {
        loop {
            {
                let mut pump = self.kernel.stdin.lock().unwrap();
                if let Some(n) = pump.try_read(buf) {
                    return n;
                }
            }
            self.sleep(1);
        }
    }
}
