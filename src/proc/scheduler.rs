//! The scheduler core: tick bookkeeping, sleep expiry, and the priority
//! lottery.
//!
//! A fixed pool of 150 tickets is split LOW=31 / MED=45 / HIGH=74. Each
//! selection draws one ticket uniformly and redraws while the drawn
//! class's run queue is empty; with every run queue empty the scheduler
//! idles until the next tick. Within a class scheduling is FIFO: a process
//! that yields while still runnable goes to the tail.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use rand::Rng;

use super::{BlockedCause, Pid, Priority, Procstate};
use crate::ctx::Wake;
use crate::kernel::{KState, Kernel};
use crate::klog::Event;
use crate::param::{LOW_TICKETS, MED_TICKETS, TOTAL_TICKETS};

/// The priority class owning `ticket`.
pub fn ticket_priority(ticket: usize) -> Priority {
    if ticket < LOW_TICKETS {
        Priority::LOW
    } else if ticket < LOW_TICKETS + MED_TICKETS {
        Priority::MED
    } else {
        Priority::HIGH
    }
}

impl Kernel {
    /// Advance the logical clock by one tick. The periodic host timer
    /// calls this; a tick during a critical section stays pending until
    /// the section closes.
    pub fn tick(&self) {
        let _ = self.ticks_counter().fetch_add(1, Ordering::SeqCst);
        self.set_tick_pending();
        if self.is_idle() {
            self.wake_scheduler();
        }
    }

    /// Spawn the periodic tick source.
    pub fn start_ticker(&self, period: Duration) {
        let kernel = self.arc();
        let _ = thread::Builder::new()
            .name(String::from("ticker"))
            .spawn(move || loop {
                thread::sleep(period);
                if kernel.is_shutdown() {
                    break;
                }
                kernel.tick();
            })
            .expect("scheduler: ticker spawn failed");
    }

    /// The scheduler loop. Runs on the host main thread; returns when the
    /// simulation shuts down.
    pub fn run(&self) {
        while !self.is_shutdown() {
            let dispatched = {
                let mut st = self.state.lock().unwrap();
                self.expire_sleepers(&mut st);
                self.select(&mut st)
            };
            if dispatched {
                // Park until the process hands the processor back.
                let _ = self.sched_wait();
            } else {
                self.klog.lock().unwrap().idle(self.ticks());
                self.set_idle(true);
                let _ = self.sched_wait();
                self.set_idle(false);
            }
        }
    }

    /// Sweep the blocked queue: charge elapsed ticks to sleepers and wake
    /// the expired ones.
    fn expire_sleepers(&self, st: &mut KState) {
        let now = self.ticks();
        let elapsed = now - st.prev_ticks;
        st.prev_ticks = now;
        if elapsed == 0 {
            return;
        }
        let blocked: Vec<Pid> = st.blocked.iter().collect();
        for pid in blocked {
            let p = match st.table.get_mut(&pid) {
                Some(p) => p,
                None => continue,
            };
            if p.cause != BlockedCause::SLEEP {
                continue;
            }
            if elapsed >= p.blocked_ticks {
                p.blocked_ticks = 0;
                p.cause = BlockedCause::NONE;
                p.state = Procstate::RUN;
                p.wait_pid = 0;
                let prio = p.prio;
                let nice = prio.nice();
                let name = p.name.clone();
                let _ = st.blocked.remove(pid);
                st.run[prio.index()].push_back(pid);
                self.klog
                    .lock()
                    .unwrap()
                    .event(now, Event::Unblocked, pid, nice, &name);
            } else {
                p.blocked_ticks -= elapsed;
            }
        }
    }

    /// Requeue the still-runnable current process, then draw the lottery
    /// and hand the processor to the head of the winning queue. The wake
    /// happens under the state lock so a concurrent kill of the winner
    /// serializes against the dispatch.
    fn select(&self, st: &mut KState) -> bool {
        if let Some(active) = st.active.take() {
            if let Some(p) = st.table.get(&active) {
                if p.state == Procstate::RUN {
                    st.run[p.prio.index()].push_back(active);
                }
            }
        }
        if st.run.iter().all(|q| q.is_empty()) {
            return false;
        }
        let prio = loop {
            let ticket = st.rng.gen_range(0..TOTAL_TICKETS);
            let prio = ticket_priority(ticket);
            if !st.run[prio.index()].is_empty() {
                break prio;
            }
        };
        let pid = st.run[prio.index()].pop_front().unwrap();
        st.active = Some(pid);
        let p = &st.table[&pid];
        self.klog
            .lock()
            .unwrap()
            .event(self.ticks(), Event::Schedule, pid, p.prio.nice(), &p.name);
        p.running.store(true, Ordering::SeqCst);
        p.ctx.baton().wake(Wake::Scheduled);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::HIGH_TICKETS;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ticket_split_matches_pool() {
        let mut counts = [0usize; 3];
        for t in 0..TOTAL_TICKETS {
            counts[ticket_priority(t).index()] += 1;
        }
        assert_eq!(counts[Priority::HIGH.index()], HIGH_TICKETS);
        assert_eq!(counts[Priority::MED.index()], MED_TICKETS);
        assert_eq!(counts[Priority::LOW.index()], LOW_TICKETS);
    }

    #[test]
    fn lottery_ratio_converges() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 10_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            let ticket = rng.gen_range(0..TOTAL_TICKETS);
            counts[ticket_priority(ticket).index()] += 1;
        }
        let expect_high = draws as f64 * HIGH_TICKETS as f64 / TOTAL_TICKETS as f64;
        let expect_med = draws as f64 * MED_TICKETS as f64 / TOTAL_TICKETS as f64;
        let expect_low = draws as f64 * LOW_TICKETS as f64 / TOTAL_TICKETS as f64;
        let within = |got: usize, want: f64| (got as f64 - want).abs() / want < 0.05;
        assert!(within(counts[Priority::HIGH.index()], expect_high));
        assert!(within(counts[Priority::MED.index()], expect_med));
        assert!(within(counts[Priority::LOW.index()], expect_low));
    }
}
