use std::time::Duration;

/// Scheduler tick interval.
pub const TICK: Duration = Duration::from_millis(100);

/// Ticks per wall-clock second.
pub const TICKS_PER_SEC: u64 = 10;

/// Stack size of each simulated process context.
pub const STACK_SIZE: usize = 1 << 20;

/// Lottery tickets held by the LOW priority class.
pub const LOW_TICKETS: usize = 31;

/// Lottery tickets held by the MED priority class.
pub const MED_TICKETS: usize = 45;

/// Lottery tickets held by the HIGH priority class.
pub const HIGH_TICKETS: usize = 74;

/// Total lottery tickets.
pub const TOTAL_TICKETS: usize = LOW_TICKETS + MED_TICKETS + HIGH_TICKETS;

/// First file descriptor backed by the per-process table; 0/1/2 pass
/// through to host stdio.
pub const FIRST_FD: i32 = 3;

/// Maximum shell input line length.
pub const MAX_LINE: usize = 4096;

/// Shell prompt.
pub const PROMPT: &str = "$ ";

/// Default scheduler log file.
pub const DEFAULT_LOG: &str = "log.txt";

/// Smallest and largest allowed FAT region, in blocks.
pub const MIN_FAT_BLOCKS: usize = 1;
pub const MAX_FAT_BLOCKS: usize = 32;

/// Largest allowed block-size config; block size is `2^(8 + config)`.
pub const MAX_BLOCK_CONFIG: usize = 4;
