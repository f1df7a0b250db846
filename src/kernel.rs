//! The kernel value: every piece of process-wide state, threaded through
//! the API rather than exposed as loose globals.
//!
//! One instance per host process. The state lock is only ever taken from
//! the scheduler, from a process-API critical section, or from the
//! host-signal bridge, and is never held across a context switch.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ctx::{Baton, Wake};
use crate::ds::queue::PidQueue;
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::klog::KLog;
use crate::proc::{Pid, Proc, SIG_STOP, SIG_TERM};

/// Process-wide mutable state guarded by one lock.
pub(crate) struct KState {
    /// The process table; owns every PCB.
    pub table: BTreeMap<Pid, Proc>,
    /// Run queues indexed by `Priority::index`.
    pub run: [PidQueue; 3],
    pub blocked: PidQueue,
    pub stopped: PidQueue,
    /// The process currently holding the processor.
    pub active: Option<Pid>,
    pub next_pid: Pid,
    /// Tick count at the last sleeper sweep.
    pub prev_ticks: u64,
    pub rng: StdRng,
}

impl KState {
    fn new() -> KState {
        KState {
            table: BTreeMap::new(),
            run: [PidQueue::new(), PidQueue::new(), PidQueue::new()],
            blocked: PidQueue::new(),
            stopped: PidQueue::new(),
            active: None,
            next_pid: 1,
            prev_ticks: 0,
            rng: StdRng::from_entropy(),
        }
    }
}

/// Host stdin, pumped by a dedicated thread so a simulated process can
/// poll for input without wedging the simulation.
pub struct StdinPump {
    rx: Option<Receiver<Vec<u8>>>,
    buf: VecDeque<u8>,
    eof: bool,
}

impl StdinPump {
    fn unconnected() -> StdinPump {
        StdinPump {
            rx: None,
            buf: VecDeque::new(),
            eof: true,
        }
    }

    /// Non-blocking read: `None` while no input is buffered, `Some(0)` at
    /// end of input.
    pub fn try_read(&mut self, out: &mut [u8]) -> Option<usize> {
        if let Some(rx) = &self.rx {
            while let Ok(chunk) = rx.try_recv() {
                if chunk.is_empty() {
                    self.eof = true;
                } else {
                    self.buf.extend(chunk);
                }
            }
        }
        if self.buf.is_empty() {
            return if self.eof { Some(0) } else { None };
        }
        let n = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.buf.pop_front().unwrap();
        }
        Some(n)
    }
}

pub struct Kernel {
    /// Back-reference handed to spawned contexts and helper threads.
    me: Weak<Kernel>,
    pub(crate) state: Mutex<KState>,
    pub(crate) fs: Mutex<Option<FileSystem>>,
    pub(crate) klog: Mutex<KLog>,
    pub(crate) stdin: Mutex<StdinPump>,
    sched_baton: Baton,
    ticks: AtomicU64,
    tick_pending: AtomicBool,
    critical: AtomicBool,
    idle: AtomicBool,
    shutdown: AtomicBool,
    foreground: AtomicI32,
}

impl Kernel {
    pub fn new(fs: Option<FileSystem>, log_path: &str) -> io::Result<Arc<Kernel>> {
        let klog = KLog::open(log_path)?;
        Ok(Arc::new_cyclic(|me| Kernel {
            me: me.clone(),
            state: Mutex::new(KState::new()),
            fs: Mutex::new(fs),
            klog: Mutex::new(klog),
            stdin: Mutex::new(StdinPump::unconnected()),
            sched_baton: Baton::new(),
            ticks: AtomicU64::new(0),
            tick_pending: AtomicBool::new(false),
            critical: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            foreground: AtomicI32::new(-1),
        }))
    }

    /// A strong handle to this kernel.
    pub(crate) fn arc(&self) -> Arc<Kernel> {
        self.me.upgrade().expect("kernel: dropped")
    }

    /// The logical clock.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub(crate) fn ticks_counter(&self) -> &AtomicU64 {
        &self.ticks
    }

    pub(crate) fn set_tick_pending(&self) {
        self.tick_pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending tick, if any.
    pub(crate) fn take_tick(&self) -> bool {
        self.tick_pending.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn enter_critical(&self) {
        self.critical.store(true, Ordering::SeqCst);
    }

    pub(crate) fn leave_critical(&self) {
        self.critical.store(false, Ordering::SeqCst);
    }

    pub(crate) fn in_critical(&self) -> bool {
        self.critical.load(Ordering::SeqCst)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// End the simulation; the scheduler loop exits at its next turn.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sched_baton.wake(Wake::Scheduled);
    }

    pub(crate) fn wake_scheduler(&self) {
        self.sched_baton.wake(Wake::Scheduled);
    }

    pub(crate) fn sched_wait(&self) -> Wake {
        self.sched_baton.wait()
    }

    /// The pid the host-signal bridge delivers to; -1 when none.
    pub fn foreground(&self) -> Pid {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn set_foreground(&self, pid: Pid) {
        self.foreground.store(pid, Ordering::SeqCst);
    }

    /// Run `f` against the mounted filesystem.
    pub fn with_fs<T, F>(&self, f: F) -> FsResult<T>
    where
        F: FnOnce(&mut FileSystem) -> FsResult<T>,
    {
        let mut guard = self.fs.lock().unwrap();
        match guard.as_mut() {
            Some(fs) => f(fs),
            None => Err(FsError::NotPermitted),
        }
    }

    /// Reclaim the filesystem for unmounting after the scheduler exits.
    pub fn take_fs(&self) -> Option<FileSystem> {
        self.fs.lock().unwrap().take()
    }

    /// Connect host stdin to the pump and start the reader thread.
    pub fn start_stdin_pump(&self) {
        let (tx, rx) = mpsc::channel();
        {
            let mut pump = self.stdin.lock().unwrap();
            *pump = StdinPump {
                rx: Some(rx),
                buf: VecDeque::new(),
                eof: false,
            };
        }
        let _ = thread::Builder::new()
            .name(String::from("stdin-pump"))
            .spawn(move || {
                let stdin = io::stdin();
                let mut line = String::new();
                loop {
                    line.clear();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) | Err(_) => {
                            let _ = tx.send(Vec::new());
                            break;
                        }
                        Ok(_) => {
                            if tx.send(line.clone().into_bytes()).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("kernel: stdin pump spawn failed");
    }

    /// Host `SIGINT`: terminate the foreground process.
    pub fn host_interrupt(&self) {
        let fg = self.foreground();
        if fg > 0 {
            let _ = self.kill_internal(fg, SIG_TERM);
        }
        eprintln!();
    }

    /// Host `SIGTSTP`: stop the foreground process; the shell moves it to
    /// the background job list when its `waitpid` reports the stop.
    pub fn host_stop(&self) {
        let fg = self.foreground();
        if fg > 0 {
            let _ = self.kill_internal(fg, SIG_STOP);
        }
        eprintln!();
    }
}
