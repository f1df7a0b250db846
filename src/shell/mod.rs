//! The shell: simulated process 1.
//!
//! Reads command lines from host stdin through the kernel's pump, parses
//! redirection / background / nice prefixes, and dispatches built-ins as
//! spawned simulated processes. Unknown commands fall back to script
//! files. Job control tracks background and stopped jobs; the foreground
//! pid is published for the host-signal bridge.

pub mod builtins;

use crate::error::FsError;
use crate::file::{Fd, OpenMode};
use crate::param::{MAX_LINE, PROMPT};
use crate::proc::{Pid, ProcCtx, ProcFn, SIG_CONT, SIG_EXITED, SIG_STOP, SIG_TERM};

/// A parsed command line.
#[derive(Debug, Clone)]
pub(crate) struct Cmd {
    pub argv: Vec<String>,
    pub background: bool,
    pub infile: Option<String>,
    pub outfile: Option<(String, OpenMode)>,
    pub nice: Option<i32>,
}

/// Tokenize a command line: whitespace-separated words, a trailing `&`
/// (possibly glued to the last word), `<`/`>`/`>>` redirections anywhere,
/// and a leading `nice N` prefix.
pub(crate) fn parse(line: &str) -> Option<Cmd> {
    let mut toks: Vec<String> = line.split_whitespace().map(String::from).collect();
    if toks.is_empty() {
        return None;
    }
    let mut background = false;
    if toks.last().map(|t| t.as_str() == "&").unwrap_or(false) {
        let _ = toks.pop();
        background = true;
    } else if let Some(last) = toks.last_mut() {
        if last.ends_with('&') {
            last.truncate(last.len() - 1);
            background = true;
            if last.is_empty() {
                let _ = toks.pop();
            }
        }
    }
    let mut nice = None;
    if toks.len() >= 3 && toks[0] == "nice" {
        nice = toks[1].parse().ok();
        toks.drain(0..2).for_each(drop);
    }
    let mut argv = Vec::new();
    let mut infile = None;
    let mut outfile = None;
    let mut i = 0;
    while i < toks.len() {
        match toks[i].as_str() {
            "<" if i + 1 < toks.len() => {
                infile = Some(toks[i + 1].clone());
                i += 2;
            }
            ">" if i + 1 < toks.len() => {
                outfile = Some((toks[i + 1].clone(), OpenMode::Write));
                i += 2;
            }
            ">>" if i + 1 < toks.len() => {
                outfile = Some((toks[i + 1].clone(), OpenMode::Append));
                i += 2;
            }
            _ => {
                argv.push(toks[i].clone());
                i += 1;
            }
        }
    }
    if argv.is_empty() {
        return None;
    }
    Some(Cmd {
        argv,
        background,
        infile,
        outfile,
        nice,
    })
}

pub(crate) fn report<E: std::fmt::Display>(ctx: &ProcCtx, err: E, cmd: &str) {
    let _ = ctx.write(2, format!("{}: {}\n", err, cmd).as_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Running,
    Stopped,
    Done,
}

struct Job {
    jid: u32,
    pid: Pid,
    cmd: String,
    status: JobStatus,
}

struct Shell<'a> {
    ctx: &'a ProcCtx,
    jobs: Vec<Job>,
}

/// Body of simulated process 1.
pub fn shell_main(ctx: &ProcCtx, _argv: Vec<String>) {
    let mut shell = Shell {
        ctx,
        jobs: Vec::new(),
    };
    shell.run();
}

impl<'a> Shell<'a> {
    fn run(&mut self) {
        let mut buf = vec![0u8; MAX_LINE];
        loop {
            if self.ctx.kernel.is_shutdown() {
                break;
            }
            let _ = self.ctx.write(1, PROMPT.as_bytes());
            let n = match self.ctx.read(0, &mut buf) {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                // End of input logs the session out.
                break;
            }
            self.poll_background();
            self.reap_done();
            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            for line in chunk.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.run_line(line);
                if self.ctx.kernel.is_shutdown() {
                    break;
                }
            }
        }
        self.ctx.kernel.request_shutdown();
    }

    fn run_line(&mut self, line: &str) {
        let cmd = match parse(line) {
            Some(cmd) => cmd,
            None => return,
        };
        match cmd.argv[0].as_str() {
            "logout" => {
                self.ctx.kernel.request_shutdown();
                return;
            }
            "jobs" => {
                self.list_jobs();
                return;
            }
            "bg" => {
                self.bg(cmd.argv.get(1).and_then(|a| a.parse().ok()));
                return;
            }
            "fg" => {
                self.fg(cmd.argv.get(1).and_then(|a| a.parse().ok()));
                return;
            }
            "man" => {
                self.man();
                return;
            }
            "nice_pid" => {
                let nice = cmd.argv.get(1).and_then(|a| a.parse().ok());
                let pid = cmd.argv.get(2).and_then(|a| a.parse().ok());
                match (nice, pid) {
                    (Some(nice), Some(pid)) => {
                        if let Err(err) = self.ctx.nice(pid, nice) {
                            report(self.ctx, err, "nice_pid");
                        }
                    }
                    _ => report(self.ctx, FsError::InvalidArg, "nice_pid"),
                }
                return;
            }
            _ => {}
        }

        let (fd_in, fd_out) = match self.open_redirects(&cmd) {
            Some(fds) => fds,
            None => return,
        };
        let func = dispatch(&cmd.argv[0]);
        let pid = self.ctx.spawn(cmd.argv.clone(), fd_in, fd_out, func);
        if let Some(nice) = cmd.nice {
            let _ = self.ctx.nice(pid, nice);
        }
        if cmd.background {
            let jid = self.push_job(pid, line.to_string(), JobStatus::Running);
            let _ = self.ctx.write(2, format!("[{}] {}\n", jid, pid).as_bytes());
        } else {
            self.wait_foreground(pid, line);
        }
        if fd_in >= crate::param::FIRST_FD {
            let _ = self.ctx.close(fd_in);
        }
        if fd_out >= crate::param::FIRST_FD {
            let _ = self.ctx.close(fd_out);
        }
    }

    /// Open `<`/`>`/`>>` targets in the shell's own table; the spawn
    /// duplicates the entries into the child.
    fn open_redirects(&self, cmd: &Cmd) -> Option<(Fd, Fd)> {
        let mut fd_in: Fd = 0;
        let mut fd_out: Fd = 1;
        if let Some(name) = &cmd.infile {
            match self.ctx.open(name, OpenMode::Read) {
                Ok(fd) => fd_in = fd,
                Err(err) => {
                    report(self.ctx, err, &cmd.argv[0]);
                    return None;
                }
            }
        }
        if let Some((name, mode)) = &cmd.outfile {
            match self.ctx.open(name, *mode) {
                Ok(fd) => fd_out = fd,
                Err(err) => {
                    if fd_in >= crate::param::FIRST_FD {
                        let _ = self.ctx.close(fd_in);
                    }
                    report(self.ctx, err, &cmd.argv[0]);
                    return None;
                }
            }
        }
        Some((fd_in, fd_out))
    }

    /// Block on a foreground child, publishing it for the host-signal
    /// bridge; a stop moves it onto the job list.
    fn wait_foreground(&mut self, pid: Pid, line: &str) {
        self.ctx.kernel.set_foreground(pid);
        let res = self.ctx.waitpid(pid, true);
        self.ctx.kernel.set_foreground(-1);
        if let Ok(Some((_, sig))) = res {
            if sig == SIG_STOP {
                let _ = self.push_job(pid, line.to_string(), JobStatus::Stopped);
            }
        }
    }

    fn push_job(&mut self, pid: Pid, cmd: String, status: JobStatus) -> u32 {
        let jid = self.jobs.last().map(|j| j.jid + 1).unwrap_or(1);
        self.jobs.push(Job {
            jid,
            pid,
            cmd,
            status,
        });
        jid
    }

    /// The job `bg`/`fg` default to: the most recently stopped one, else
    /// the most recent.
    fn current_job(&self) -> Option<Pid> {
        self.jobs
            .iter()
            .rev()
            .find(|j| j.status == JobStatus::Stopped)
            .or_else(|| self.jobs.last())
            .map(|j| j.pid)
    }

    fn list_jobs(&self) {
        let current = self.current_job();
        for job in &self.jobs {
            let tag = if current == Some(job.pid) { '+' } else { ' ' };
            let status = match job.status {
                JobStatus::Running => "Running",
                JobStatus::Stopped => "Stopped",
                JobStatus::Done => "Done",
            };
            let _ = self.ctx.write(
                2,
                format!("[{}]{} {}\t{}\t{}\n", job.jid, tag, job.pid, status, job.cmd).as_bytes(),
            );
        }
    }

    fn bg(&mut self, jid: Option<u32>) {
        let pid = match jid {
            Some(jid) => self.jobs.iter().find(|j| j.jid == jid).map(|j| j.pid),
            None => self
                .jobs
                .iter()
                .rev()
                .find(|j| j.status == JobStatus::Stopped)
                .map(|j| j.pid),
        };
        let pid = match pid {
            Some(pid) => pid,
            None => return,
        };
        if self.ctx.kill(pid, SIG_CONT).is_ok() {
            if let Some(job) = self.jobs.iter_mut().find(|j| j.pid == pid) {
                job.status = JobStatus::Running;
            }
            // Collect the cont notification so it does not linger.
            let _ = self.ctx.waitpid(pid, false);
        }
    }

    fn fg(&mut self, jid: Option<u32>) {
        let index = match jid {
            Some(jid) => self.jobs.iter().position(|j| j.jid == jid),
            None => {
                if self.jobs.is_empty() {
                    None
                } else {
                    Some(self.jobs.len() - 1)
                }
            }
        };
        let index = match index {
            Some(index) => index,
            None => return,
        };
        let job = self.jobs.remove(index);
        if job.status == JobStatus::Stopped {
            let _ = self.ctx.kill(job.pid, SIG_CONT);
            let _ = self.ctx.waitpid(job.pid, false);
        }
        self.wait_foreground(job.pid, &job.cmd);
    }

    /// Collect state changes for every tracked job without blocking.
    fn poll_background(&mut self) {
        for i in 0..self.jobs.len() {
            if self.jobs[i].status == JobStatus::Done {
                continue;
            }
            match self.ctx.waitpid(self.jobs[i].pid, false) {
                Ok(Some((_, sig))) => {
                    self.jobs[i].status = match sig {
                        s if s == SIG_STOP => JobStatus::Stopped,
                        s if s == SIG_CONT => JobStatus::Running,
                        s if s == SIG_TERM || s == SIG_EXITED => JobStatus::Done,
                        _ => self.jobs[i].status,
                    };
                }
                Ok(None) => {}
                Err(_) => self.jobs[i].status = JobStatus::Done,
            }
        }
    }

    /// Report and drop finished jobs.
    fn reap_done(&mut self) {
        let current = self.current_job();
        let mut i = 0;
        while i < self.jobs.len() {
            if self.jobs[i].status == JobStatus::Done {
                let job = self.jobs.remove(i);
                let tag = if current == Some(job.pid) { '+' } else { ' ' };
                let _ = self.ctx.write(
                    2,
                    format!("[{}]{}  Done\t{}\n", job.jid, tag, job.cmd).as_bytes(),
                );
            } else {
                i += 1;
            }
        }
    }

    fn man(&self) {
        let text = "nice priority command: sets priority of command\n\
                    nice_pid priority pid: adjusts nice level of process pid\n\
                    man: lists all possible commands\n\
                    bg [job_id]: continues the last stopped job, or job_id\n\
                    fg [job_id]: brings last stopped job (or job_id) to foreground\n\
                    jobs: list all jobs\n\
                    logout: exit the shell\n\
                    cat: same cat from bash\n\
                    sleep n: sleep for n seconds\n\
                    busy: busy wait indefinitely\n\
                    echo: repeats same output\n\
                    ls: lists all files in working directory\n\
                    touch file: creates empty file, or updates timestamp\n\
                    mv src dest: renames src to dest\n\
                    cp src dest: copies src to dest\n\
                    chmod: changes permissions\n\
                    ps: lists all processes\n\
                    kill [-SIGNAL_NAME] pid: sends signal to process name pid\n";
        let _ = self.ctx.write(2, text.as_bytes());
    }
}

/// Map a command name onto its built-in, or fall back to running it as a
/// script file.
pub(crate) fn dispatch(name: &str) -> ProcFn {
    match builtins::lookup(name) {
        Some(builtin) => Box::new(move |ctx: &ProcCtx, argv: Vec<String>| builtin(ctx, &argv)),
        None => Box::new(|ctx: &ProcCtx, argv: Vec<String>| builtins::script(ctx, &argv)),
    }
}

/// Run one script line: same grammar as the interactive shell, without
/// job control. Background children are left to be orphan-reaped when
/// the script exits.
pub(crate) fn run_script_line(ctx: &ProcCtx, line: &str) {
    let cmd = match parse(line) {
        Some(cmd) => cmd,
        None => return,
    };
    let mut fd_in = ctx.fd_in;
    let mut fd_out = ctx.fd_out;
    if let Some(name) = &cmd.infile {
        match ctx.open(name, OpenMode::Read) {
            Ok(fd) => fd_in = fd,
            Err(err) => {
                report(ctx, err, &cmd.argv[0]);
                return;
            }
        }
    }
    if let Some((name, mode)) = &cmd.outfile {
        match ctx.open(name, *mode) {
            Ok(fd) => fd_out = fd,
            Err(err) => {
                report(ctx, err, &cmd.argv[0]);
                return;
            }
        }
    }
    let func = dispatch(&cmd.argv[0]);
    let pid = ctx.spawn(cmd.argv.clone(), fd_in, fd_out, func);
    if let Some(nice) = cmd.nice {
        let _ = ctx.nice(pid, nice);
    }
    if !cmd.background {
        let _ = ctx.waitpid(pid, true);
    }
    if fd_in >= crate::param::FIRST_FD && fd_in != ctx.fd_in {
        let _ = ctx.close(fd_in);
    }
    if fd_out >= crate::param::FIRST_FD && fd_out != ctx.fd_out {
        let _ = ctx.close(fd_out);
    }
}
