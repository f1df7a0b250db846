//! Process control blocks and the handle simulated processes use to reach
//! the kernel.
//!
//! The process table exclusively owns each PCB; the run/blocked/stopped
//! queues and all parent/child edges hold pids resolved through the table.
//! A PCB's context is a parked host thread owned by the PCB and joined on
//! reap.

pub mod procs;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ctx::{self, Baton, Context, Wake};
use crate::ds::queue::PidQueue;
use crate::file::{Fd, FdTable};
use crate::kernel::Kernel;

pub type Pid = i32;

/// Signal delivered by the TERM path of `kill`.
pub const SIG_TERM: i32 = 0;
/// Signal delivered by the STOP path of `kill`.
pub const SIG_STOP: i32 = 1;
/// Signal delivered by the CONT path of `kill`.
pub const SIG_CONT: i32 = 2;
/// Reported to a waiting parent when a child exits normally.
pub const SIG_EXITED: i32 = 3;

/// Scheduling priority; nice numerals -1/0/+1 map onto HIGH/MED/LOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    HIGH,
    MED,
    LOW,
}

impl Priority {
    pub fn nice(self) -> i32 {
        match self {
            Priority::HIGH => -1,
            Priority::MED => 0,
            Priority::LOW => 1,
        }
    }

    pub fn from_nice(nice: i32) -> Priority {
        if nice < 0 {
            Priority::HIGH
        } else if nice == 0 {
            Priority::MED
        } else {
            Priority::LOW
        }
    }

    /// Index into the run-queue array.
    pub fn index(self) -> usize {
        match self {
            Priority::HIGH => 0,
            Priority::MED => 1,
            Priority::LOW => 2,
        }
    }
}

/// Process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procstate {
    RUN,
    BLOCK,
    STOP,
    ZOMB,
}

impl Procstate {
    /// Single-letter tag used by `ps`.
    pub fn tag(self) -> char {
        match self {
            Procstate::RUN => 'R',
            Procstate::BLOCK => 'B',
            Procstate::STOP => 'S',
            Procstate::ZOMB => 'Z',
        }
    }
}

/// Why a process is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedCause {
    NONE,
    SLEEP,
    WAIT,
}

/// The body of a simulated process.
pub type ProcFn = Box<dyn FnOnce(&ProcCtx, Vec<String>) + Send + 'static>;

/// Per-process state.
pub struct Proc {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: String,
    pub children: PidQueue,
    pub zombie_children: PidQueue,
    /// Stop/cont notifications not yet collected by `waitpid`.
    pub pending_child_signals: PidQueue,
    pub prio: Priority,
    pub state: Procstate,
    pub cause: BlockedCause,
    pub blocked_ticks: u64,
    pub wait_pid: Pid,
    /// Last signal delivered to this process.
    pub signal: i32,
    /// Last child state change observed by this process's `waitpid`.
    pub child_signal: i32,
    /// Name of the child whose state change woke this process.
    pub waited_name: String,
    pub fd_in: Fd,
    pub fd_out: Fd,
    pub fds: FdTable,
    pub ctx: Context,
    /// Set when the process is torn down; its thread unwinds at the next
    /// suspension point.
    pub killed: Arc<AtomicBool>,
    /// True while this context holds the processor.
    pub running: Arc<AtomicBool>,
    /// Mirrors STOP so a running context can relinquish without the table
    /// lock.
    pub suspended: Arc<AtomicBool>,
}

/// Handle a simulated process uses to reach the kernel. One per process,
/// owned by the process body.
pub struct ProcCtx {
    pub kernel: Arc<Kernel>,
    pub pid: Pid,
    pub fd_in: Fd,
    pub fd_out: Fd,
    pub(crate) baton: Arc<Baton>,
    pub(crate) killed: Arc<AtomicBool>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) suspended: Arc<AtomicBool>,
}

impl ProcCtx {
    /// Park until the scheduler hands the processor back.
    pub(crate) fn park(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.kernel.wake_scheduler();
        match self.baton.wait() {
            Wake::Reaped => ctx::teardown(),
            Wake::Scheduled => {
                if self.killed.load(Ordering::SeqCst) {
                    ctx::teardown();
                }
            }
        }
    }

    /// Hand the processor back without parking; the exit path.
    pub(crate) fn handoff(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.kernel.wake_scheduler();
    }

    fn enter(&self) {
        self.kernel.enter_critical();
    }

    /// Close a process-API critical section: honor a deferred tick, a
    /// pending stop, or a teardown.
    fn leave(&self) {
        self.kernel.leave_critical();
        if self.killed.load(Ordering::SeqCst) {
            ctx::teardown();
        }
        if self.suspended.load(Ordering::SeqCst) {
            self.park();
            return;
        }
        if self.kernel.take_tick() {
            self.park();
        }
    }

    /// Pre-emption point: long-running user code calls this so a pending
    /// tick or signal can take effect.
    pub fn preempt_point(&self) {
        if self.killed.load(Ordering::SeqCst) {
            ctx::teardown();
        }
        if self.suspended.load(Ordering::SeqCst) {
            self.park();
            return;
        }
        if !self.kernel.in_critical() && self.kernel.take_tick() {
            self.park();
        }
    }

    /// Spawn a child running `func(argv)`; the child inherits copies of
    /// the table entries behind `fd_in`/`fd_out` and starts at MED.
    pub fn spawn(&self, argv: Vec<String>, fd_in: Fd, fd_out: Fd, func: ProcFn) -> Pid {
        self.enter();
        let pid = self
            .kernel
            .spawn_internal(Some(self.pid), argv, fd_in, fd_out, func);
        self.leave();
        pid
    }

    /// Collect a child state change. `pid` -1 accepts any child. Returns
    /// `Ok(None)` when non-blocking and nothing is pending.
    pub fn waitpid(
        &self,
        pid: Pid,
        blocking: bool,
    ) -> crate::error::ProcResult<Option<(Pid, i32)>> {
        self.enter();
        let res = match self.kernel.wait_check(self.pid, pid) {
            procs::WaitCheck::NoChildren => Err(crate::error::ProcError::NoChildren),
            procs::WaitCheck::Ready(who, sig) => Ok(Some((who, sig))),
            procs::WaitCheck::Nothing => {
                if blocking {
                    self.kernel.wait_block(self.pid, pid);
                    self.park();
                    Ok(Some(self.kernel.wait_finish(self.pid)))
                } else {
                    Ok(None)
                }
            }
        };
        self.leave();
        res
    }

    /// Deliver a TERM/STOP/CONT signal.
    pub fn kill(&self, pid: Pid, sig: i32) -> crate::error::ProcResult<()> {
        self.enter();
        let res = self.kernel.kill_internal(pid, sig);
        self.leave();
        res
    }

    /// Adjust a process's priority; returns the new nice value.
    pub fn nice(&self, pid: Pid, nice: i32) -> crate::error::ProcResult<i32> {
        self.enter();
        let res = self.kernel.nice_internal(pid, nice);
        self.leave();
        res
    }

    /// Block for at least `ticks` scheduler ticks.
    pub fn sleep(&self, ticks: u64) {
        self.enter();
        if ticks > 0 {
            self.kernel.sleep_block(self.pid, ticks);
            self.park();
        }
        self.leave();
    }

    /// Terminate the calling process with `code` reported to its parent.
    /// Runs from the body wrapper; does not return to user code.
    pub(crate) fn exit_body(&self, code: i32) {
        self.kernel.enter_critical();
        self.kernel.exit_mark(self.pid, code);
        self.kernel.leave_critical();
        self.handoff();
    }
}
