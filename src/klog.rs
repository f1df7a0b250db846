//! The scheduler event log.
//!
//! One line per event, TAB-separated:
//! `[<tick>]\t<EVENT>\t<pid>\t<nice>\t<name>`. NICE carries the old nice
//! value before the new one. The idle selection is logged as pid -1.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::proc::Pid;

/// Events recorded to the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Create,
    Schedule,
    Unblocked,
    Blocked,
    Zombie,
    Orphaned,
    Waited,
    Signaled,
    Exited,
}

impl Event {
    fn as_str(self) -> &'static str {
        match self {
            Event::Create => "CREATE",
            Event::Schedule => "SCHEDULE",
            Event::Unblocked => "UNBLOCKED",
            Event::Blocked => "BLOCKED",
            Event::Zombie => "ZOMBIE",
            Event::Orphaned => "ORPHANED",
            Event::Waited => "WAITED",
            Event::Signaled => "SIGNALED",
            Event::Exited => "EXITED",
        }
    }
}

pub struct KLog {
    file: File,
}

impl KLog {
    pub fn open(path: &str) -> io::Result<KLog> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(KLog { file })
    }

    pub fn event(&mut self, tick: u64, event: Event, pid: Pid, nice: i32, name: &str) {
        let _ = writeln!(
            self.file,
            "[{}]\t{}\t{}\t{}\t{}",
            tick,
            event.as_str(),
            pid,
            nice,
            name
        );
    }

    /// NICE lines carry both the old and the new nice value.
    pub fn nice_change(&mut self, tick: u64, pid: Pid, old: i32, new: i32, name: &str) {
        let _ = writeln!(
            self.file,
            "[{}]\tNICE\t{}\t{}\t{}\t{}",
            tick, pid, old, new, name
        );
    }

    pub fn idle(&mut self, tick: u64) {
        self.event(tick, Event::Schedule, -1, -1, "IDLE");
    }
}
