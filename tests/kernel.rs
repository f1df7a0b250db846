//! Scheduler and process-lifecycle tests against a live kernel instance
//! with a fast tick source.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pennos::error::ProcError;
use pennos::kernel::Kernel;
use pennos::proc::{Pid, ProcCtx, SIG_CONT, SIG_EXITED, SIG_STOP, SIG_TERM};

fn new_kernel(dir: &tempfile::TempDir) -> Arc<Kernel> {
    let log = dir.path().join("log.txt");
    Kernel::new(None, log.to_str().unwrap()).unwrap()
}

#[test]
fn children_all_run_and_are_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let ran: Arc<Mutex<Vec<Pid>>> = Arc::new(Mutex::new(Vec::new()));
    let ran_in = Arc::clone(&ran);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            for i in 0..5 {
                let ran = Arc::clone(&ran_in);
                let _ = ctx.spawn(
                    vec![format!("worker_{}", i)],
                    0,
                    1,
                    Box::new(move |child: &ProcCtx, _| {
                        ran.lock().unwrap().push(child.pid);
                    }),
                );
            }
            let mut reaped = 0;
            loop {
                match ctx.waitpid(-1, true) {
                    Ok(Some((_, sig))) => {
                        assert_eq!(sig, SIG_EXITED);
                        reaped += 1;
                    }
                    Ok(None) => {}
                    Err(ProcError::NoChildren) => break,
                    Err(err) => panic!("waitpid: {}", err),
                }
            }
            assert_eq!(reaped, 5);
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    assert_eq!(ran.lock().unwrap().len(), 5);
}

#[test]
fn sleep_lasts_at_least_its_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let slept: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let slept_in = Arc::clone(&slept);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            let before = ctx.kernel.ticks();
            ctx.sleep(5);
            let after = ctx.kernel.ticks();
            slept_in.lock().unwrap().push((before, after));
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    let slept = slept.lock().unwrap();
    assert_eq!(slept.len(), 1);
    let (before, after) = slept[0];
    assert!(after - before >= 5, "woke after {} ticks", after - before);
}

#[test]
fn waitpid_reports_stop_cont_term() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            let child = ctx.spawn(
                vec![String::from("busy")],
                0,
                1,
                Box::new(|c: &ProcCtx, _| loop {
                    c.preempt_point();
                }),
            );
            ctx.kill(child, SIG_STOP).unwrap();
            let (_, sig) = ctx.waitpid(child, true).unwrap().unwrap();
            seen_in.lock().unwrap().push(sig);
            // Stopping a stopped process is refused.
            assert_eq!(ctx.kill(child, SIG_STOP), Err(ProcError::InvalidState));
            ctx.kill(child, SIG_CONT).unwrap();
            let (_, sig) = ctx.waitpid(child, true).unwrap().unwrap();
            seen_in.lock().unwrap().push(sig);
            ctx.kill(child, SIG_TERM).unwrap();
            let (_, sig) = ctx.waitpid(child, true).unwrap().unwrap();
            seen_in.lock().unwrap().push(sig);
            assert_eq!(ctx.waitpid(-1, false), Err(ProcError::NoChildren));
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    assert_eq!(*seen.lock().unwrap(), vec![SIG_STOP, SIG_CONT, SIG_TERM]);
}

#[test]
fn terminating_a_parent_destroys_the_subtree() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let ready = Arc::new(AtomicBool::new(false));
    let ready_in = Arc::clone(&ready);
    let table_sizes: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sizes_in = Arc::clone(&table_sizes);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            let ready = Arc::clone(&ready_in);
            let middle = ctx.spawn(
                vec![String::from("middle")],
                0,
                1,
                Box::new(move |mid: &ProcCtx, _| {
                    let _ = mid.spawn(
                        vec![String::from("leaf")],
                        0,
                        1,
                        Box::new(|leaf: &ProcCtx, _| loop {
                            leaf.preempt_point();
                        }),
                    );
                    ready.store(true, Ordering::SeqCst);
                    loop {
                        mid.preempt_point();
                    }
                }),
            );
            while !ready_in.load(Ordering::SeqCst) {
                ctx.sleep(1);
            }
            // init + middle + leaf
            sizes_in.lock().unwrap().push(ctx.kernel.ps().len());
            ctx.kill(middle, SIG_TERM).unwrap();
            let _ = ctx.waitpid(middle, false);
            // the subtree is gone; only init remains
            sizes_in.lock().unwrap().push(ctx.kernel.ps().len());
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    assert_eq!(*table_sizes.lock().unwrap(), vec![3, 1]);
}

#[test]
fn single_priority_scheduling_is_fifo() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let order: Arc<Mutex<Vec<Pid>>> = Arc::new(Mutex::new(Vec::new()));
    let order_in = Arc::clone(&order);
    let spawned: Arc<Mutex<Vec<Pid>>> = Arc::new(Mutex::new(Vec::new()));
    let spawned_in = Arc::clone(&spawned);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            for i in 0..4 {
                let order = Arc::clone(&order_in);
                let pid = ctx.spawn(
                    vec![format!("fifo_{}", i)],
                    0,
                    1,
                    Box::new(move |child: &ProcCtx, _| {
                        order.lock().unwrap().push(child.pid);
                    }),
                );
                spawned_in.lock().unwrap().push(pid);
            }
            loop {
                match ctx.waitpid(-1, true) {
                    Err(_) => break,
                    Ok(_) => {}
                }
            }
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    assert_eq!(*order.lock().unwrap(), *spawned.lock().unwrap());
}

#[test]
fn zombie_waits_for_its_parent() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = new_kernel(&dir);
    let zombie_seen = Arc::new(AtomicBool::new(false));
    let zombie_in = Arc::clone(&zombie_seen);
    let child_pid = Arc::new(AtomicI32::new(0));
    let child_in = Arc::clone(&child_pid);

    let _ = kernel.spawn_init(
        "init",
        Box::new(move |ctx: &ProcCtx, _| {
            let pid = ctx.spawn(
                vec![String::from("zombie_child")],
                0,
                1,
                Box::new(|_, _| {}),
            );
            child_in.store(pid, Ordering::SeqCst);
            // Let the child exit without reaping it.
            ctx.sleep(3);
            let listing = ctx.kernel.ps();
            zombie_in.store(
                listing.iter().any(|row| row.contains("Status:Z")),
                Ordering::SeqCst,
            );
            let (reaped, sig) = ctx.waitpid(-1, true).unwrap().unwrap();
            assert_eq!(reaped, pid);
            assert_eq!(sig, SIG_EXITED);
            ctx.kernel.request_shutdown();
        }),
    );
    kernel.start_ticker(Duration::from_millis(2));
    kernel.run();
    assert!(zombie_seen.load(Ordering::SeqCst));
    assert!(child_pid.load(Ordering::SeqCst) > 0);
}
