//! Execution contexts for simulated processes.
//!
//! Each context owns a dedicated host thread with a fixed, generous stack,
//! parked on a one-token baton. Exactly one context logically runs at a
//! time: the scheduler wakes a context's baton to hand it the processor,
//! and the context wakes the scheduler's baton to give it back. A context
//! being torn down is woken with `Wake::Reaped` and unwinds instead of
//! resuming user code.

use std::panic;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::param::STACK_SIZE;

/// Why a parked context was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The scheduler handed this context the processor.
    Scheduled,
    /// The context is being torn down and must unwind.
    Reaped,
}

/// One-token hand-off: `wake` deposits a token, `wait` consumes it.
pub struct Baton {
    state: Mutex<Option<Wake>>,
    cond: Condvar,
}

impl Baton {
    pub fn new() -> Baton {
        Baton {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn wake(&self, why: Wake) {
        let mut state = self.state.lock().unwrap();
        // A pending Reaped token must not be downgraded.
        if *state != Some(Wake::Reaped) {
            *state = Some(why);
        }
        self.cond.notify_one();
    }

    pub fn wait(&self) -> Wake {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(why) = state.take() {
                return why;
            }
            state = self.cond.wait(state).unwrap();
        }
    }
}

impl Default for Baton {
    fn default() -> Baton {
        Baton::new()
    }
}

/// Panic payload used to unwind a context torn down mid-run. The body
/// wrapper installed by the process layer swallows it.
pub struct Teardown;

/// Unwind the current context.
pub fn teardown() -> ! {
    panic::panic_any(Teardown);
}

/// A simulated process context: the parked thread and its baton.
pub struct Context {
    baton: Arc<Baton>,
    thread: Option<JoinHandle<()>>,
}

impl Context {
    /// Build a context over `body`. The thread parks immediately and runs
    /// `body` after its first `Wake::Scheduled`; a first `Wake::Reaped`
    /// (killed before ever being scheduled) skips the body entirely.
    pub fn spawn<F>(name: &str, baton: Arc<Baton>, body: F) -> Context
    where
        F: FnOnce() + Send + 'static,
    {
        let parked = baton.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                if parked.wait() == Wake::Reaped {
                    return;
                }
                body();
            })
            .expect("context: thread spawn failed");
        Context {
            baton,
            thread: Some(thread),
        }
    }

    pub fn baton(&self) -> &Arc<Baton> {
        &self.baton
    }

    /// Wake the context for teardown and join its thread. A context
    /// reaping itself (a zombie collected by its waiting parent from its
    /// own exit path) is detached instead of joined.
    pub fn reap(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            self.baton.wake(Wake::Reaped);
            let _ = handle.join();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.reap();
    }
}
