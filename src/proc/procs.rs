//! The process API: spawn, exit, kill, waitpid, nice, sleep.
//!
//! Every entry point runs inside a critical section opened by the calling
//! `ProcCtx`; the kernel state lock is never held across a context switch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{
    BlockedCause, Pid, Priority, Proc, ProcCtx, ProcFn, Procstate, SIG_CONT, SIG_EXITED,
    SIG_STOP, SIG_TERM,
};
use crate::ctx::{Baton, Context, Teardown};
use crate::ds::queue::PidQueue;
use crate::error::{ProcError, ProcResult};
use crate::file::{Fd, FdTable};
use crate::kernel::{KState, Kernel};
use crate::klog::Event;
use crate::param::FIRST_FD;

/// Join the contexts of PCBs torn down under the state lock. Must run
/// with no kernel locks held.
fn join_reaped(mut reaped: Vec<Proc>) {
    for p in reaped.iter_mut() {
        p.ctx.reap();
    }
}

/// Outcome of a non-blocking `waitpid` probe.
pub enum WaitCheck {
    /// A child state change was collected.
    Ready(Pid, i32),
    /// Children exist but none has changed state yet.
    Nothing,
    /// The caller has no children to wait for.
    NoChildren,
}

impl Kernel {
    /// Allocate a PCB and a context over `func`, register both, and queue
    /// the process at MED. The new process first runs when the scheduler
    /// picks it.
    pub fn spawn_internal(
        &self,
        parent: Option<Pid>,
        argv: Vec<String>,
        fd_in: Fd,
        fd_out: Fd,
        func: ProcFn,
    ) -> Pid {
        let name = argv.get(0).cloned().unwrap_or_else(|| String::from("?"));
        let baton = Arc::new(Baton::new());
        let killed = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let suspended = Arc::new(AtomicBool::new(false));

        let mut st = self.state.lock().unwrap();
        let pid = st.next_pid;
        st.next_pid += 1;

        let child_ctx = ProcCtx {
            kernel: self.arc(),
            pid,
            fd_in,
            fd_out,
            baton: Arc::clone(&baton),
            killed: Arc::clone(&killed),
            running: Arc::clone(&running),
            suspended: Arc::clone(&suspended),
        };
        let body = move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| func(&child_ctx, argv)));
            match result {
                Ok(()) => child_ctx.exit_body(SIG_EXITED),
                Err(payload) => {
                    if payload.downcast_ref::<Teardown>().is_some() {
                        // Torn down by a signal. Only the context holding
                        // the processor hands it back.
                        if child_ctx.running.load(Ordering::SeqCst) {
                            child_ctx.handoff();
                        }
                    } else {
                        log::error!("process {} panicked", child_ctx.pid);
                        child_ctx.exit_body(SIG_TERM);
                    }
                }
            }
        };
        let ctx = Context::spawn(&name, baton, body);

        let mut fds = FdTable::new();
        if let Some(ppid) = parent {
            if let Some(pp) = st.table.get(&ppid) {
                for &fd in &[fd_in, fd_out] {
                    if fd >= FIRST_FD {
                        if let Some(open) = pp.fds.get(fd) {
                            fds.insert_at(fd, open.clone());
                        }
                    }
                }
            }
        }

        let proc = Proc {
            pid,
            parent,
            name: name.clone(),
            children: PidQueue::new(),
            zombie_children: PidQueue::new(),
            pending_child_signals: PidQueue::new(),
            prio: Priority::MED,
            state: Procstate::RUN,
            cause: BlockedCause::NONE,
            blocked_ticks: 0,
            wait_pid: 0,
            signal: -1,
            child_signal: -1,
            waited_name: String::new(),
            fd_in,
            fd_out,
            fds,
            ctx,
            killed,
            running,
            suspended,
        };
        st.table.insert(pid, proc);
        if let Some(ppid) = parent {
            if let Some(pp) = st.table.get_mut(&ppid) {
                pp.children.push_back(pid);
            }
        }
        st.run[Priority::MED.index()].push_back(pid);
        self.klog
            .lock()
            .unwrap()
            .event(self.ticks(), Event::Create, pid, Priority::MED.nice(), &name);
        drop(st);
        if self.is_idle() {
            self.wake_scheduler();
        }
        pid
    }

    /// Spawn the initial parentless process (the shell) reading host
    /// stdin and writing host stdout, bumped to HIGH priority.
    pub fn spawn_init(&self, name: &str, func: ProcFn) -> Pid {
        let pid = self.spawn_internal(None, vec![name.to_string()], 0, 1, func);
        let _ = self.nice_internal(pid, -1);
        pid
    }

    /// The exit path: record the terminal signal and run the TERM
    /// teardown for the calling process.
    pub(crate) fn exit_mark(&self, pid: Pid, code: i32) {
        let mut reaped = Vec::new();
        let mut st = self.state.lock().unwrap();
        if let Some(p) = st.table.get_mut(&pid) {
            p.signal = code;
            let nice = p.prio.nice();
            let name = p.name.clone();
            self.klog
                .lock()
                .unwrap()
                .event(self.ticks(), Event::Exited, pid, nice, &name);
        }
        self.k_kill(&mut st, pid, SIG_TERM, &mut reaped);
        drop(st);
        join_reaped(reaped);
    }

    /// Validate and deliver a signal: TERM (0), STOP (1), or CONT (2).
    pub(crate) fn kill_internal(&self, pid: Pid, sig: i32) -> ProcResult<()> {
        let mut st = self.state.lock().unwrap();
        let state = match st.table.get(&pid) {
            Some(p) => p.state,
            None => return Err(ProcError::NoSuchProcess),
        };
        if state == Procstate::ZOMB {
            return Err(ProcError::InvalidState);
        }
        if state == Procstate::STOP && sig == SIG_STOP {
            return Err(ProcError::InvalidState);
        }
        if state != Procstate::STOP && sig == SIG_CONT {
            return Err(ProcError::InvalidState);
        }
        if !(SIG_TERM..=SIG_CONT).contains(&sig) {
            return Err(ProcError::InvalidState);
        }
        {
            let p = st.table.get_mut(&pid).unwrap();
            p.signal = sig;
            let nice = p.prio.nice();
            let name = p.name.clone();
            self.klog
                .lock()
                .unwrap()
                .event(self.ticks(), Event::Signaled, pid, nice, &name);
        }
        let mut reaped = Vec::new();
        self.k_kill(&mut st, pid, sig, &mut reaped);
        drop(st);
        join_reaped(reaped);
        // The host-signal bridge delivers kills while the scheduler may be
        // idling; let it re-select.
        if self.is_idle() {
            self.wake_scheduler();
        }
        Ok(())
    }

    /// Signal delivery with the state lock held. Torn-down PCBs land in
    /// `reaped`; their contexts are joined only after the lock is
    /// released, since a victim may be about to block on it.
    pub(crate) fn k_kill(&self, st: &mut KState, pid: Pid, sig: i32, reaped: &mut Vec<Proc>) {
        let parent = match st.table.get(&pid) {
            Some(p) => p.parent,
            None => return,
        };
        let ppid = match parent {
            Some(ppid) => ppid,
            None => {
                // Terminating the parentless init/shell ends the
                // simulation.
                if sig == SIG_TERM {
                    if let Some(p) = st.table.get_mut(&pid) {
                        p.killed.store(true, Ordering::SeqCst);
                    }
                    self.request_shutdown();
                }
                return;
            }
        };
        match sig {
            SIG_TERM => self.k_term(st, pid, ppid, reaped),
            SIG_STOP => self.k_stop(st, pid, ppid),
            SIG_CONT => self.k_cont(st, pid, ppid),
            _ => {}
        }
    }

    fn detach(&self, st: &mut KState, pid: Pid) {
        let (state, prio) = match st.table.get(&pid) {
            Some(p) => (p.state, p.prio),
            None => return,
        };
        match state {
            Procstate::BLOCK => {
                let _ = st.blocked.remove(pid);
            }
            Procstate::STOP => {
                let _ = st.stopped.remove(pid);
            }
            _ => {
                if st.active == Some(pid) {
                    st.active = None;
                } else {
                    let _ = st.run[prio.index()].remove(pid);
                }
            }
        }
    }

    fn k_term(&self, st: &mut KState, pid: Pid, ppid: Pid, reaped: &mut Vec<Proc>) {
        // A pending stop notification for this child dies with it.
        if let Some(pp) = st.table.get_mut(&ppid) {
            let _ = pp.pending_child_signals.remove(pid);
        }
        self.detach(st, pid);
        if let Some(pp) = st.table.get_mut(&ppid) {
            let _ = pp.children.remove(pid);
        }
        {
            let p = match st.table.get_mut(&pid) {
                Some(p) => p,
                None => return,
            };
            p.state = Procstate::ZOMB;
            p.cause = BlockedCause::NONE;
            p.killed.store(true, Ordering::SeqCst);
            let nice = p.prio.nice();
            let name = p.name.clone();
            self.klog
                .lock()
                .unwrap()
                .event(self.ticks(), Event::Zombie, pid, nice, &name);
        }
        // The whole descendant subtree dies with the process.
        self.kill_orphans(st, pid, reaped);

        let parent_waiting = match st.table.get(&ppid) {
            Some(pp) => {
                pp.state == Procstate::BLOCK
                    && pp.cause == BlockedCause::WAIT
                    && (pp.wait_pid == -1 || pp.wait_pid == pid)
            }
            None => false,
        };
        if parent_waiting {
            let (vsig, vname) = {
                let v = &st.table[&pid];
                (v.signal, v.name.clone())
            };
            self.wake_waiter(st, ppid, pid, vsig, vname);
            self.cleanup(st, pid, reaped);
        } else if let Some(pp) = st.table.get_mut(&ppid) {
            pp.zombie_children.push_back(pid);
        }
    }

    fn k_stop(&self, st: &mut KState, pid: Pid, ppid: Pid) {
        let state = match st.table.get(&pid) {
            Some(p) => p.state,
            None => return,
        };
        self.detach(st, pid);
        {
            let p = st.table.get_mut(&pid).unwrap();
            if state != Procstate::BLOCK {
                // The prior blocked cause survives a stop; a running
                // process has none.
                p.cause = BlockedCause::NONE;
            }
            p.state = Procstate::STOP;
            p.suspended.store(true, Ordering::SeqCst);
        }
        st.stopped.push_back(pid);
        self.notify_parent(st, ppid, pid);
    }

    fn k_cont(&self, st: &mut KState, pid: Pid, ppid: Pid) {
        let _ = st.stopped.remove(pid);
        let (cause, prio) = match st.table.get(&pid) {
            Some(p) => (p.cause, p.prio),
            None => return,
        };
        {
            let p = st.table.get_mut(&pid).unwrap();
            p.suspended.store(false, Ordering::SeqCst);
            p.state = if cause != BlockedCause::NONE {
                Procstate::BLOCK
            } else {
                Procstate::RUN
            };
        }
        if cause != BlockedCause::NONE {
            st.blocked.push_back(pid);
        } else {
            st.run[prio.index()].push_back(pid);
        }
        self.notify_parent(st, ppid, pid);
    }

    /// Queue a stop/cont notification for the parent, or wake it when it
    /// is already waiting. Duplicate notifications collapse.
    fn notify_parent(&self, st: &mut KState, ppid: Pid, pid: Pid) {
        let already = match st.table.get(&ppid) {
            Some(pp) => pp.pending_child_signals.contains(pid),
            None => return,
        };
        if already {
            return;
        }
        let waiting = {
            let pp = &st.table[&ppid];
            pp.state == Procstate::BLOCK
                && pp.cause == BlockedCause::WAIT
                && (pp.wait_pid == -1 || pp.wait_pid == pid)
        };
        if waiting {
            let (vsig, vname) = {
                let v = &st.table[&pid];
                (v.signal, v.name.clone())
            };
            self.wake_waiter(st, ppid, pid, vsig, vname);
        } else {
            st.table
                .get_mut(&ppid)
                .unwrap()
                .pending_child_signals
                .push_back(pid);
        }
    }

    /// Move a WAIT-blocked parent back to its run queue with the child's
    /// state change recorded.
    fn wake_waiter(&self, st: &mut KState, ppid: Pid, child: Pid, sig: i32, child_name: String) {
        let prio = {
            let pp = st.table.get_mut(&ppid).unwrap();
            pp.cause = BlockedCause::NONE;
            pp.blocked_ticks = 0;
            pp.state = Procstate::RUN;
            pp.child_signal = sig;
            pp.wait_pid = child;
            pp.waited_name = child_name;
            let nice = pp.prio.nice();
            let name = pp.name.clone();
            self.klog
                .lock()
                .unwrap()
                .event(self.ticks(), Event::Unblocked, ppid, nice, &name);
            pp.prio
        };
        let _ = st.blocked.remove(ppid);
        st.run[prio.index()].push_back(ppid);
    }

    /// Destroy every descendant of `pid`. Orphans never reach a zombie
    /// queue; they are reaped on the spot.
    fn kill_orphans(&self, st: &mut KState, pid: Pid, reaped: &mut Vec<Proc>) {
        loop {
            let child = match st.table.get_mut(&pid) {
                Some(p) => p.children.pop_front(),
                None => None,
            };
            match child {
                Some(c) => self.destroy_orphan(st, c, reaped),
                None => break,
            }
        }
        loop {
            let zombie = match st.table.get_mut(&pid) {
                Some(p) => p.zombie_children.pop_front(),
                None => None,
            };
            match zombie {
                Some(z) => {
                    if let Some(p) = st.table.get(&z) {
                        let nice = p.prio.nice();
                        let name = p.name.clone();
                        self.klog
                            .lock()
                            .unwrap()
                            .event(self.ticks(), Event::Orphaned, z, nice, &name);
                    }
                    self.cleanup(st, z, reaped);
                }
                None => break,
            }
        }
    }

    fn destroy_orphan(&self, st: &mut KState, pid: Pid, reaped: &mut Vec<Proc>) {
        self.kill_orphans(st, pid, reaped);
        if !st.table.contains_key(&pid) {
            return;
        }
        self.detach(st, pid);
        {
            let p = &st.table[&pid];
            let nice = p.prio.nice();
            let name = p.name.clone();
            self.klog
                .lock()
                .unwrap()
                .event(self.ticks(), Event::Orphaned, pid, nice, &name);
        }
        self.cleanup(st, pid, reaped);
    }

    /// Release a PCB: drop it from the table and mark it for joining once
    /// the state lock is gone.
    fn cleanup(&self, st: &mut KState, pid: Pid, reaped: &mut Vec<Proc>) {
        if let Some(p) = st.table.remove(&pid) {
            p.killed.store(true, Ordering::SeqCst);
            reaped.push(p);
        }
    }

    /// Probe for a collectable child state change: zombies first, then
    /// stop/cont notifications.
    pub(crate) fn wait_check(&self, me: Pid, target: Pid) -> WaitCheck {
        let mut st = self.state.lock().unwrap();
        let (nchildren, nzombies) = match st.table.get(&me) {
            Some(p) => (p.children.len(), p.zombie_children.len()),
            None => return WaitCheck::NoChildren,
        };
        if nchildren + nzombies == 0 {
            return WaitCheck::NoChildren;
        }
        let zombie = match st.table.get_mut(&me) {
            Some(p) => {
                if target == -1 {
                    p.zombie_children.pop_front()
                } else if p.zombie_children.remove(target) {
                    Some(target)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(z) = zombie {
            let sig = st.table.get(&z).map(|p| p.signal).unwrap_or(SIG_TERM);
            if let Some(p) = st.table.get(&z) {
                let nice = p.prio.nice();
                let name = p.name.clone();
                self.klog
                    .lock()
                    .unwrap()
                    .event(self.ticks(), Event::Waited, z, nice, &name);
            }
            let mut reaped = Vec::new();
            self.cleanup(&mut st, z, &mut reaped);
            if let Some(p) = st.table.get_mut(&me) {
                p.wait_pid = 0;
            }
            drop(st);
            join_reaped(reaped);
            return WaitCheck::Ready(z, sig);
        }
        let pending = match st.table.get_mut(&me) {
            Some(p) => {
                if target == -1 {
                    p.pending_child_signals.pop_front()
                } else if p.pending_child_signals.remove(target) {
                    Some(target)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(s) = pending {
            let sig = match st.table.get_mut(&s) {
                Some(p) => {
                    let sig = p.signal;
                    p.signal = -1;
                    let nice = p.prio.nice();
                    let name = p.name.clone();
                    self.klog
                        .lock()
                        .unwrap()
                        .event(self.ticks(), Event::Waited, s, nice, &name);
                    sig
                }
                None => -1,
            };
            if let Some(p) = st.table.get_mut(&me) {
                p.wait_pid = 0;
            }
            return WaitCheck::Ready(s, sig);
        }
        WaitCheck::Nothing
    }

    /// Block the caller with cause WAIT until a child state change. A
    /// no-op when the caller was torn down in the meantime; its next park
    /// unwinds it.
    pub(crate) fn wait_block(&self, me: Pid, target: Pid) {
        let mut st = self.state.lock().unwrap();
        let p = match st.table.get_mut(&me) {
            Some(p) if !p.killed.load(Ordering::SeqCst) => p,
            _ => return,
        };
        p.state = Procstate::BLOCK;
        p.cause = BlockedCause::WAIT;
        p.blocked_ticks = 0;
        p.wait_pid = target;
        let nice = p.prio.nice();
        let name = p.name.clone();
        self.klog
            .lock()
            .unwrap()
            .event(self.ticks(), Event::Blocked, me, nice, &name);
        st.blocked.push_back(me);
        st.active = None;
    }

    /// Collect the child state change that woke a WAIT-blocked caller.
    pub(crate) fn wait_finish(&self, me: Pid) -> (Pid, i32) {
        let mut st = self.state.lock().unwrap();
        match st.table.get_mut(&me) {
            Some(p) => {
                let nice = p.prio.nice();
                let waited = p.waited_name.clone();
                self.klog
                    .lock()
                    .unwrap()
                    .event(self.ticks(), Event::Waited, me, nice, &waited);
                let sig = p.child_signal;
                p.child_signal = -1;
                let who = p.wait_pid;
                p.wait_pid = 0;
                p.waited_name.clear();
                (who, sig)
            }
            None => (0, -1),
        }
    }

    /// Map `nice` onto a priority class and relocate the process to the
    /// tail of the new class's run queue. Same priority is a no-op.
    pub(crate) fn nice_internal(&self, pid: Pid, nice: i32) -> ProcResult<i32> {
        let mut st = self.state.lock().unwrap();
        let (old, state, name) = match st.table.get(&pid) {
            Some(p) => (p.prio, p.state, p.name.clone()),
            None => return Err(ProcError::NoSuchProcess),
        };
        let new = Priority::from_nice(nice);
        if old == new {
            return Ok(new.nice());
        }
        self.klog
            .lock()
            .unwrap()
            .nice_change(self.ticks(), pid, old.nice(), new.nice(), &name);
        st.table.get_mut(&pid).unwrap().prio = new;
        if state == Procstate::RUN && st.active != Some(pid) && st.run[old.index()].remove(pid) {
            st.run[new.index()].push_back(pid);
        }
        Ok(new.nice())
    }

    /// Block the caller with cause SLEEP for `ticks`. A no-op when the
    /// caller was torn down in the meantime.
    pub(crate) fn sleep_block(&self, me: Pid, ticks: u64) {
        let mut st = self.state.lock().unwrap();
        let p = match st.table.get_mut(&me) {
            Some(p) if !p.killed.load(Ordering::SeqCst) => p,
            _ => return,
        };
        p.state = Procstate::BLOCK;
        p.cause = BlockedCause::SLEEP;
        p.blocked_ticks = ticks;
        p.wait_pid = 0;
        let nice = p.prio.nice();
        let name = p.name.clone();
        self.klog
            .lock()
            .unwrap()
            .event(self.ticks(), Event::Blocked, me, nice, &name);
        st.blocked.push_back(me);
        st.active = None;
    }

    /// One `ps` row per process, in pid order.
    pub fn ps(&self) -> Vec<String> {
        let st = self.state.lock().unwrap();
        st.table
            .values()
            .map(|p| {
                format!(
                    "PID:{}\tPPID:{}\tPriority:{}\tStatus:{}\tName:{}\n",
                    p.pid,
                    p.parent.unwrap_or(0),
                    p.prio.nice(),
                    p.state.tag(),
                    p.name
                )
            })
            .collect()
    }
}
