//! Built-in commands, each run as a spawned simulated process with the
//! shell's parsed argv and in/out descriptors.

use chrono::{Datelike, Local, TimeZone, Timelike};

use super::{report, run_script_line};
use crate::error::FsError;
use crate::file::{Fd, OpenMode};
use crate::fs::{DirEnt, FileKind, Perm};
use crate::param::TICKS_PER_SEC;
use crate::proc::{ProcCtx, SIG_CONT, SIG_STOP, SIG_TERM};

/// A built-in command body.
pub type Builtin = fn(&ProcCtx, &[String]);

pub fn lookup(name: &str) -> Option<Builtin> {
    Some(match name {
        "echo" => echo,
        "cat" => cat,
        "ls" => ls,
        "touch" => touch,
        "mv" => mv,
        "cp" => cp,
        "rm" => rm,
        "chmod" => chmod,
        "cd" => cd,
        "mkdir" => mkdir,
        "rmdir" => rmdir,
        "pwd" => pwd,
        "ln" => ln,
        "ps" => ps,
        "kill" => kill,
        "sleep" => sleep_cmd,
        "busy" => busy,
        "zombify" => zombify,
        "orphanify" => orphanify,
        "hang" => hang,
        "nohang" => nohang,
        "recur" => recur,
        _ => return None,
    })
}

fn echo(ctx: &ProcCtx, argv: &[String]) {
    let mut line = argv[1..].join(" ");
    line.push('\n');
    let _ = ctx.write(ctx.fd_out, line.as_bytes());
}

/// Copy `from` to `to` until end-of-file.
fn copy_fd(ctx: &ProcCtx, from: Fd, to: Fd, cmd: &str) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match ctx.read(from, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                report(ctx, err, cmd);
                break;
            }
        };
        if ctx.write(to, &buf[..n]).is_err() {
            break;
        }
        ctx.preempt_point();
    }
}

fn cat(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() > 1 && ctx.fd_in == 0 {
        for name in &argv[1..] {
            let fd = match ctx.open(name, OpenMode::Read) {
                Ok(fd) => fd,
                Err(err) => {
                    report(ctx, err, "cat");
                    return;
                }
            };
            copy_fd(ctx, fd, ctx.fd_out, "cat");
            let _ = ctx.close(fd);
        }
    } else {
        copy_fd(ctx, ctx.fd_in, ctx.fd_out, "cat");
    }
}

fn ls(ctx: &ProcCtx, argv: &[String]) {
    let entries = ctx.kernel.with_fs(|fs| {
        let path = match argv.get(1) {
            Some(arg) => fs.abs(arg),
            None => fs.cwd().clone(),
        };
        match fs.list(&path) {
            Ok(entries) => Ok(entries),
            // A non-directory argument lists just itself.
            Err(FsError::NotDir) => Ok(vec![fs.get_meta(&path, false)?]),
            Err(err) => Err(err),
        }
    });
    let entries = match entries {
        Ok(entries) => entries,
        Err(err) => {
            report(ctx, err, "ls");
            return;
        }
    };
    let width = |f: fn(&DirEnt) -> usize| entries.iter().map(f).max().unwrap_or(1);
    let fb_w = width(|e| digits(e.first_block.get() as u64));
    let size_w = width(|e| digits(e.size.get() as u64));
    let day_w = width(|e| digits(day_of(e.mtime.get()) as u64));
    for ent in &entries {
        let perm = ent.perm();
        let when = Local.timestamp_opt(ent.mtime.get(), 0).single();
        let (month, day, hour, min) = match when {
            Some(t) => (t.format("%b").to_string(), t.day(), t.hour(), t.minute()),
            None => (String::from("???"), 0, 0, 0),
        };
        let line = format!(
            "{:>fb_w$} {} {}{}{} {:>size_w$} {} {:>day_w$} {:02}:{:02} {}\n",
            ent.first_block.get(),
            ent.kind().tag(),
            if perm.contains(Perm::EXEC) { 'x' } else { '-' },
            if perm.contains(Perm::READ) { 'r' } else { '-' },
            if perm.contains(Perm::WRITE) { 'w' } else { '-' },
            ent.size.get(),
            month,
            day,
            hour,
            min,
            ent.name_str(),
            fb_w = fb_w,
            size_w = size_w,
            day_w = day_w,
        );
        let _ = ctx.write(ctx.fd_out, line.as_bytes());
    }
}

fn digits(mut n: u64) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

fn day_of(mtime: i64) -> u32 {
    Local
        .timestamp_opt(mtime, 0)
        .single()
        .map(|t| t.day())
        .unwrap_or(0)
}

fn touch(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() < 2 {
        report(ctx, FsError::InvalidArg, "touch");
        return;
    }
    for name in &argv[1..] {
        let res = ctx.kernel.with_fs(|fs| {
            let path = fs.abs(name);
            match fs.create(&path, FileKind::Regular) {
                Ok(()) | Err(FsError::Exists) => {}
                Err(err) => return Err(err),
            }
            // Bump the mtime of the (possibly pre-existing) target.
            fs.write(&path, 0, &[], true)
        });
        if let Err(err) = res {
            report(ctx, err, "touch");
            return;
        }
    }
}

fn mv(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() != 3 {
        report(ctx, FsError::InvalidArg, "mv");
        return;
    }
    let res = ctx.kernel.with_fs(|fs| {
        let src = fs.abs(&argv[1]);
        let dst = fs.abs(&argv[2]);
        fs.rename(&src, &dst)
    });
    if let Err(err) = res {
        report(ctx, err, "mv");
    }
}

fn cp(ctx: &ProcCtx, argv: &[String]) {
    // `cp -h host src` reads from the host; `cp src -h host` writes to it.
    let host_src = argv.get(1).map(|a| a == "-h").unwrap_or(false);
    let host_dst = argv.get(2).map(|a| a == "-h").unwrap_or(false);
    let (src, dst) = match (host_src, host_dst, argv.len()) {
        (true, _, 4) => (argv[2].clone(), argv[3].clone()),
        (false, true, 4) => (argv[1].clone(), argv[3].clone()),
        (false, false, 3) => (argv[1].clone(), argv[2].clone()),
        _ => {
            report(ctx, FsError::InvalidArg, "cp");
            return;
        }
    };
    let data = if host_src {
        match std::fs::read(&src) {
            Ok(data) => data,
            Err(_) => {
                report(ctx, FsError::NotFound, "cp");
                return;
            }
        }
    } else {
        let res = ctx.kernel.with_fs(|fs| {
            let path = fs.abs(&src);
            let ent = fs.get_meta(&path, true)?;
            let mut buf = vec![0u8; ent.size.get() as usize];
            let n = fs.read(&path, 0, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        });
        match res {
            Ok(data) => data,
            Err(err) => {
                report(ctx, err, "cp");
                return;
            }
        }
    };
    if host_dst {
        if std::fs::write(&dst, &data).is_err() {
            report(ctx, FsError::NotPermitted, "cp");
        }
        return;
    }
    let res = ctx.kernel.with_fs(|fs| {
        let mut path = fs.abs(&dst);
        if let Ok(ent) = fs.get_meta(&path, true) {
            if ent.kind() == FileKind::Directory {
                let name = fs.abs(&src);
                let name = name.file_name().unwrap_or("cp.out").to_string();
                path = path.join(&name);
            }
        }
        match fs.create(&path, FileKind::Regular) {
            Ok(()) => {}
            Err(FsError::Exists) => fs.truncate(&path, true)?,
            Err(err) => return Err(err),
        }
        fs.write(&path, 0, &data, true)
    });
    if let Err(err) = res {
        report(ctx, err, "cp");
    }
}

fn rm(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() < 2 {
        report(ctx, FsError::InvalidArg, "rm");
        return;
    }
    for name in &argv[1..] {
        let res = ctx.kernel.with_fs(|fs| {
            let path = fs.abs(name);
            let ent = fs.get_meta(&path, false)?;
            if ent.kind() == FileKind::Directory {
                return Err(FsError::IsDir);
            }
            // Links are removed, not followed.
            fs.truncate(&path, false)?;
            let pos = fs.remove(&path)?;
            fs.cleanup(pos);
            Ok(())
        });
        if let Err(err) = res {
            report(ctx, err, "rm");
            return;
        }
    }
}

fn chmod(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() != 3 {
        report(ctx, FsError::InvalidArg, "chmod");
        return;
    }
    let spec = argv[1].as_bytes();
    if spec.len() != 2 {
        report(ctx, FsError::InvalidArg, "chmod");
        return;
    }
    let bit = match spec[1] {
        b'x' => Perm::EXEC,
        b'r' => Perm::READ,
        b'w' => Perm::WRITE,
        _ => {
            report(ctx, FsError::InvalidArg, "chmod");
            return;
        }
    };
    let res = ctx.kernel.with_fs(|fs| {
        let path = fs.abs(&argv[2]);
        let mut ent = fs.get_meta(&path, true)?;
        let mut perm = ent.perm();
        match spec[0] {
            b'+' => perm.insert(bit),
            b'-' => perm.remove(bit),
            _ => return Err(FsError::InvalidArg),
        }
        ent.perm = perm.bits();
        fs.set_meta(&path, &ent, true)
    });
    if let Err(err) = res {
        report(ctx, err, "chmod");
    }
}

fn cd(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() != 2 {
        report(ctx, FsError::InvalidArg, "cd");
        return;
    }
    let res = ctx.kernel.with_fs(|fs| {
        let path = fs.abs(&argv[1]);
        let ent = fs.get_meta(&path, true)?;
        if ent.kind() != FileKind::Directory {
            return Err(FsError::NotDir);
        }
        fs.set_cwd(path);
        Ok(())
    });
    if let Err(err) = res {
        report(ctx, err, "cd");
    }
}

fn mkdir(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() < 2 {
        report(ctx, FsError::InvalidArg, "mkdir");
        return;
    }
    for name in &argv[1..] {
        let res = ctx
            .kernel
            .with_fs(|fs| fs.create(&fs.abs(name), FileKind::Directory));
        if let Err(err) = res {
            report(ctx, err, "mkdir");
            return;
        }
    }
}

fn rmdir(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() < 2 {
        report(ctx, FsError::InvalidArg, "rmdir");
        return;
    }
    for name in &argv[1..] {
        let res = ctx.kernel.with_fs(|fs| {
            let path = fs.abs(name);
            let ent = fs.get_meta(&path, false)?;
            if ent.kind() != FileKind::Directory {
                return Err(FsError::NotDir);
            }
            fs.truncate(&path, false)?;
            let pos = fs.remove(&path)?;
            fs.cleanup(pos);
            Ok(())
        });
        if let Err(err) = res {
            report(ctx, err, "rmdir");
            return;
        }
    }
}

fn pwd(ctx: &ProcCtx, _argv: &[String]) {
    let cwd = ctx.kernel.with_fs(|fs| Ok(fs.cwd().to_string()));
    if let Ok(mut cwd) = cwd {
        cwd.push('\n');
        let _ = ctx.write(ctx.fd_out, cwd.as_bytes());
    }
}

fn ln(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() != 4 {
        report(ctx, FsError::InvalidArg, "ln");
        return;
    }
    if argv[1] != "-s" {
        // Only symbolic links exist here.
        report(ctx, FsError::NotPermitted, "ln");
        return;
    }
    let res = ctx.kernel.with_fs(|fs| {
        let link = fs.abs(&argv[3]);
        if fs.get_meta(&link, false).is_ok() {
            return Err(FsError::Exists);
        }
        fs.create(&link, FileKind::Link)?;
        // The link stores its target as NUL-terminated data bytes.
        let mut target = fs.abs(&argv[2]).to_string().into_bytes();
        target.push(0);
        fs.write(&link, 0, &target, false)
    });
    if let Err(err) = res {
        report(ctx, err, "ln");
    }
}

fn ps(ctx: &ProcCtx, _argv: &[String]) {
    for line in ctx.kernel.ps() {
        let _ = ctx.write(ctx.fd_out, line.as_bytes());
    }
}

fn kill(ctx: &ProcCtx, argv: &[String]) {
    if argv.len() < 2 {
        report(ctx, FsError::InvalidArg, "kill");
        return;
    }
    let (sig, first) = match argv[1].as_str() {
        "-term" => (SIG_TERM, 2),
        "-stop" => (SIG_STOP, 2),
        "-cont" => (SIG_CONT, 2),
        _ => (SIG_TERM, 1),
    };
    for arg in &argv[first..] {
        let pid = match arg.parse() {
            Ok(pid) => pid,
            Err(_) => {
                report(ctx, FsError::InvalidArg, "kill");
                continue;
            }
        };
        if let Err(err) = ctx.kill(pid, sig) {
            report(ctx, err, "kill");
        }
    }
}

fn sleep_cmd(ctx: &ProcCtx, argv: &[String]) {
    let seconds: u64 = match argv.get(1).and_then(|a| a.parse().ok()) {
        Some(n) => n,
        None => {
            report(ctx, FsError::InvalidArg, "sleep");
            return;
        }
    };
    ctx.sleep(seconds * TICKS_PER_SEC);
}

fn busy(ctx: &ProcCtx, _argv: &[String]) {
    loop {
        ctx.preempt_point();
    }
}

fn zombify(ctx: &ProcCtx, _argv: &[String]) {
    let argv = vec![String::from("zombie_child")];
    let _ = ctx.spawn(argv, ctx.fd_in, ctx.fd_out, Box::new(|_, _| {}));
    loop {
        ctx.preempt_point();
    }
}

fn orphanify(ctx: &ProcCtx, _argv: &[String]) {
    let argv = vec![String::from("orphan_child")];
    let _ = ctx.spawn(
        argv,
        ctx.fd_in,
        ctx.fd_out,
        Box::new(|child: &ProcCtx, _| loop {
            child.preempt_point();
        }),
    );
    // Exit immediately, orphaning the spinning child.
}

/// Spawn ten nappers and wait on them, blocking or polling.
fn reap_children(ctx: &ProcCtx, blocking: bool) {
    let mut first = 0;
    for i in 0..10 {
        let name = format!("child_{}", i);
        let pid = ctx.spawn(
            vec![name.clone()],
            ctx.fd_in,
            ctx.fd_out,
            Box::new(|child: &ProcCtx, _| child.sleep(1)),
        );
        if i == 0 {
            first = pid;
        }
        let _ = ctx.write(2, format!("{} was spawned\n", name).as_bytes());
    }
    loop {
        match ctx.waitpid(-1, blocking) {
            Err(_) => break,
            Ok(None) => ctx.sleep(1),
            Ok(Some((pid, _))) => {
                let _ = ctx.write(2, format!("child_{} was reaped\n", pid - first).as_bytes());
            }
        }
    }
}

fn hang(ctx: &ProcCtx, _argv: &[String]) {
    reap_children(ctx, true);
}

fn nohang(ctx: &ProcCtx, _argv: &[String]) {
    reap_children(ctx, false);
}

/// Each generation spawns and block-waits the next, Gen_A through Gen_Z.
fn spawn_generation(ctx: &ProcCtx, depth: u8) {
    if depth >= 26 {
        return;
    }
    let name = format!("Gen_{}", (b'A' + depth) as char);
    let pid = ctx.spawn(
        vec![name.clone()],
        ctx.fd_in,
        ctx.fd_out,
        Box::new(move |child: &ProcCtx, _| spawn_generation(child, depth + 1)),
    );
    let _ = ctx.write(2, format!("{} was spawned\n", name).as_bytes());
    if let Ok(Some((reaped, _))) = ctx.waitpid(pid, true) {
        if reaped == pid {
            let _ = ctx.write(2, format!("{} was reaped\n", name).as_bytes());
        }
    }
}

fn recur(ctx: &ProcCtx, _argv: &[String]) {
    spawn_generation(ctx, 0);
}

/// Fallback for unknown command names: run the named file as a script,
/// one command per line, provided it carries the execute bit.
pub fn script(ctx: &ProcCtx, argv: &[String]) {
    let name = &argv[0];
    let loaded = ctx.kernel.with_fs(|fs| {
        let path = fs.abs(name);
        let ent = fs.get_meta(&path, true)?;
        if !ent.perm().contains(Perm::EXEC) {
            return Err(FsError::PermDenied);
        }
        let mut buf = vec![0u8; ent.size.get() as usize];
        let n = fs.read(&path, 0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    });
    let content = match loaded {
        Ok(content) => content,
        Err(err) => {
            report(ctx, err, name);
            return;
        }
    };
    let text = String::from_utf8_lossy(&content).into_owned();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        run_script_line(ctx, line);
    }
}
