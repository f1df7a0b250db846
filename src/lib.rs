//! PennOS: a user-space operating system in a process.
//!
//! One host process simulates a kernel: cooperative multitasking with a
//! priority lottery, signals and process lifecycle, and a FAT-style
//! filesystem mounted from a single backing file. A shell runs as simulated
//! process 1 and dispatches built-in commands as new simulated processes.

#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate static_assertions;

pub mod ctx;
pub mod ds;
pub mod error;
pub mod file;
pub mod fs;
pub mod kernel;
pub mod klog;
pub mod param;
pub mod proc;
pub mod shell;
