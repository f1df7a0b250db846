//! Host entry point: mount the backing file, boot the shell, bridge host
//! signals, and run the scheduler until logout.

use std::env;
use std::process;
use std::sync::Arc;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGTSTP};
use signal_hook::iterator::Signals;

use pennos::fs::{Disk, FileSystem};
use pennos::kernel::Kernel;
use pennos::param::{DEFAULT_LOG, TICK};
use pennos::shell;

fn usage() -> ! {
    eprintln!("usage: pennos <fs-backing-file> [<log-file>]");
    eprintln!("       pennos mkfs <file> <fat-blocks 1..=32> <block-config 0..=4>");
    process::exit(2);
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() >= 2 && args[1] == "mkfs" {
        if args.len() != 5 {
            usage();
        }
        let fat_blocks = args[3].parse().unwrap_or(0);
        let block_config = args[4].parse().unwrap_or(usize::MAX);
        if let Err(err) = Disk::mkfs(&args[2], fat_blocks, block_config, None) {
            eprintln!("{}: mkfs", err);
            process::exit(1);
        }
        return;
    }

    if args.len() < 2 || args.len() > 3 {
        usage();
    }
    let fs = match FileSystem::mount(&args[1]) {
        Ok(fs) => fs,
        Err(err) => {
            eprintln!("{}: {}", err, args[1]);
            process::exit(1);
        }
    };
    let log_path = args.get(2).map(String::as_str).unwrap_or(DEFAULT_LOG);
    let kernel = match Kernel::new(Some(fs), log_path) {
        Ok(kernel) => kernel,
        Err(err) => {
            eprintln!("OPERATION NOT PERMITTED: {}: {}", log_path, err);
            process::exit(1);
        }
    };

    kernel.start_stdin_pump();
    start_signal_bridge(&kernel);
    let _ = kernel.spawn_init("shell", Box::new(shell::shell_main));
    kernel.start_ticker(TICK);

    kernel.run();

    if let Some(fs) = kernel.take_fs() {
        fs.unmount();
    }
}

/// Forward host `SIGINT`/`SIGTSTP` to the foreground simulated process.
/// Neither terminates the host.
fn start_signal_bridge(kernel: &Arc<Kernel>) {
    let mut signals =
        Signals::new(&[SIGINT, SIGTSTP]).expect("signal bridge: registration failed");
    let kernel = Arc::clone(kernel);
    let _ = thread::Builder::new()
        .name(String::from("signal-bridge"))
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGINT => kernel.host_interrupt(),
                    SIGTSTP => kernel.host_stop(),
                    _ => {}
                }
            }
        })
        .expect("signal bridge: spawn failed");
}
