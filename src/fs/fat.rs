//! FAT chains: allocation, traversal, and byte transfer across linked
//! blocks.
//!
//! Positions are FAT-addressed byte offsets: `block * block_size + offset`
//! with `offset < block_size`. Walking a position forward follows the
//! chain, so logically contiguous bytes span physically scattered blocks.

use std::cmp;

use super::disk::{Disk, FREE_BLOCK, LAST_BLOCK};
use crate::error::{FsError, FsResult};

/// A FAT-addressed byte position.
pub type DataPos = u64;

/// Position of the first byte of `block`.
pub fn pos_of(block: u16, block_size: usize) -> DataPos {
    block as u64 * block_size as u64
}

impl Disk {
    /// Reserve a zeroed block to follow `prev`, or start a fresh chain
    /// when `prev` is 0. The directory engine relies on the zeroing.
    pub fn allocate(&mut self, prev: u16) -> FsResult<u16> {
        for i in 1..=self.data_blocks() as u16 {
            if self.fat_get(i) == FREE_BLOCK {
                if prev != 0 {
                    self.fat_set(prev, i);
                }
                self.fat_set(i, LAST_BLOCK);
                let zeroes = vec![0u8; self.block_size()];
                self.write_at(i, 0, &zeroes);
                self.sync();
                return Ok(i);
            }
        }
        Err(FsError::NoSpace)
    }

    /// Free every block on the chain starting at `start`.
    pub fn free_chain(&mut self, start: u16) {
        let mut block = start;
        while block != LAST_BLOCK && block != FREE_BLOCK {
            let next = self.fat_get(block);
            self.fat_set(block, FREE_BLOCK);
            block = next;
        }
        self.sync();
    }

    /// Walk `delta` logical bytes ahead of `pos`, extending the chain when
    /// the walk passes its end.
    pub fn seek(&mut self, pos: DataPos, delta: usize) -> FsResult<DataPos> {
        let bs = self.block_size();
        let mut block = (pos / bs as u64) as u16;
        let mut off = pos as usize % bs + delta;
        loop {
            if off < bs {
                return Ok(block as u64 * bs as u64 + off as u64);
            }
            off -= bs;
            block = match self.fat_get(block) {
                LAST_BLOCK => self.allocate(block)?,
                next => next,
            };
        }
    }

    /// Like `seek` but never extends; `None` when `delta` runs past the
    /// end of the chain.
    pub fn seek_within(&self, pos: DataPos, delta: usize) -> Option<DataPos> {
        let bs = self.block_size();
        let mut block = (pos / bs as u64) as u16;
        let mut off = pos as usize % bs + delta;
        loop {
            if off < bs {
                return Some(block as u64 * bs as u64 + off as u64);
            }
            off -= bs;
            block = match self.fat_get(block) {
                LAST_BLOCK => return None,
                next => next,
            };
        }
    }

    /// Read into `buf` from `pos`, following the chain. Returns the bytes
    /// actually read; the chain may end early.
    pub fn read_chain(&self, pos: DataPos, buf: &mut [u8]) -> usize {
        let bs = self.block_size();
        let mut block = (pos / bs as u64) as u16;
        let mut off = pos as usize % bs;
        let mut done = 0;
        while block != LAST_BLOCK && done < buf.len() {
            let n = cmp::min(buf.len() - done, bs - off);
            self.read_at(block, off, &mut buf[done..done + n]);
            done += n;
            off = 0;
            block = self.fat_get(block);
        }
        done
    }

    /// Write `buf` at `pos`, extending the chain as needed.
    pub fn write_chain(&mut self, pos: DataPos, buf: &[u8]) -> FsResult<()> {
        let bs = self.block_size();
        let mut block = (pos / bs as u64) as u16;
        let mut off = pos as usize % bs;
        let mut done = 0;
        loop {
            let n = cmp::min(buf.len() - done, bs - off);
            self.write_at(block, off, &buf[done..done + n]);
            done += n;
            if done == buf.len() {
                self.sync();
                return Ok(());
            }
            off = 0;
            block = match self.fat_get(block) {
                LAST_BLOCK => self.allocate(block)?,
                next => next,
            };
        }
    }
}
