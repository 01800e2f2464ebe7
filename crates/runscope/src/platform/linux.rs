//! ptrace backend.
//!
//! A ptrace relationship belongs to the thread that created it, so every
//! ptrace request for one target runs on a single dedicated tracer thread.
//! The target is seized rather than attached: it keeps running, and each
//! register read interrupts one thread, copies its registers and lets it
//! go again. Stack memory is read with `process_vm_readv`, which needs no
//! stop at all.
//!
//! Waits for a stop are polled against a deadline. A thread-group leader
//! that called `pthread_exit` stays a zombie until the last thread exits
//! and never reports a stop, so it is never interrupted. Anything still
//! traced when the tracer thread ends is detached by the kernel.

use crate::error::{Error, Result};
use crate::platform::{Registers, RemoteMemory, Tracer};
use crate::process::{self, ThreadState, ThreadStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::uio::{RemoteIoVec, process_vm_readv};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::HashSet;
use std::io::IoSliceMut;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often an idle tracer thread collects stops it did not ask for
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Longest wait for an interrupted thread to report its stop
const STOP_TIMEOUT: Duration = Duration::from_millis(250);

const WAIT_POLL: Duration = Duration::from_millis(1);

enum Command {
    Registers {
        tid: u32,
        reply: Sender<Result<Registers>>,
    },
    Detach {
        reply: Sender<Result<()>>,
    },
}

struct Session {
    pid: Pid,
    commands: Sender<Command>,
    handle: JoinHandle<()>,
    exited: Arc<AtomicBool>,
}

/// Linux [`Tracer`]
#[derive(Default)]
pub struct NativeTracer {
    session: Option<Session>,
}

impl NativeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn attached_pid(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.pid.as_raw() as u32)
    }

    fn request<T>(&self, build: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let session = self.session.as_ref().ok_or(Error::NotAttached)?;
        let (reply, response) = crossbeam_channel::bounded(1);
        session
            .commands
            .send(build(reply))
            .map_err(|_| Error::TracerGone)?;
        response.recv().map_err(|_| Error::TracerGone)?
    }
}

impl Tracer for NativeTracer {
    fn attach(&mut self, pid: u32) -> Result<()> {
        if let Some(current) = self.attached_pid() {
            return Err(Error::AlreadyAttached(current));
        }
        if !process::is_process_running(pid) {
            return Err(Error::ProcessNotFound(format!("PID {}", pid)));
        }
        let raw = i32::try_from(pid)
            .map_err(|_| Error::InvalidArgument(format!("PID {} is out of range", pid)))?;
        let target = Pid::from_raw(raw);

        let (commands, inbox) = crossbeam_channel::unbounded();
        let (ready, seized) = crossbeam_channel::bounded(1);
        let exited = Arc::new(AtomicBool::new(false));
        let traced = TracedProcess {
            pid: target,
            exited: Arc::clone(&exited),
            stragglers: RefCell::new(HashSet::new()),
        };

        let handle = thread::Builder::new()
            .name("runscope-tracer".to_string())
            .spawn(move || {
                let result = traced.seize();
                let ok = result.is_ok();
                let _ = ready.send(result);
                if ok {
                    traced.serve(inbox);
                }
            })?;

        match seized.recv() {
            Ok(Ok(())) => {
                log::debug!("tracer thread seized PID {}", pid);
                self.session = Some(Session {
                    pid: target,
                    commands,
                    handle,
                    exited,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::TracerGone)
            }
        }
    }

    fn detach(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let (reply, response) = crossbeam_channel::bounded(1);
        let result = match session.commands.send(Command::Detach { reply }) {
            Ok(()) => response.recv().unwrap_or(Err(Error::TracerGone)),
            Err(_) => Err(Error::TracerGone),
        };
        drop(session.commands);
        if session.handle.join().is_err() {
            log::warn!("tracer thread for PID {} panicked", session.pid);
        }

        match result {
            // Nothing left to release once the target is gone.
            Err(Error::ProcessNotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn enumerate_threads(&mut self) -> Result<Vec<u32>> {
        let pid = self.attached_pid().ok_or(Error::NotAttached)?;
        process::thread_ids(pid)
    }

    fn thread_state(&mut self, tid: u32) -> ThreadStatus {
        match self.attached_pid() {
            Some(pid) => process::read_thread_status(pid, tid),
            None => ThreadStatus::unknown(tid),
        }
    }

    fn read_registers(&mut self, tid: u32) -> Result<Registers> {
        self.request(|reply| Command::Registers { tid, reply })
    }

    fn is_alive(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let pid = session.pid.as_raw() as u32;
        // A zombie leader alone does not end the process.
        !session.exited.load(Ordering::Relaxed) && process::has_live_threads(pid)
    }
}

impl RemoteMemory for NativeTracer {
    fn read_word(&self, addr: u64) -> Option<u64> {
        let session = self.session.as_ref()?;
        let mut word = [0u8; 8];
        let remote = [RemoteIoVec {
            base: usize::try_from(addr).ok()?,
            len: word.len(),
        }];
        let mut local = [IoSliceMut::new(&mut word)];
        match process_vm_readv(session.pid, &mut local, &remote) {
            Ok(8) => Some(u64::from_ne_bytes(word)),
            _ => None,
        }
    }
}

impl Drop for NativeTracer {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            log::warn!("failed to release traced process: {}", e);
        }
    }
}

/// Tracer-thread side of a session. Only ever touched by that thread.
struct TracedProcess {
    pid: Pid,
    exited: Arc<AtomicBool>,
    /// Threads seized for a read whose stop did not arrive in time
    stragglers: RefCell<HashSet<Pid>>,
}

impl TracedProcess {
    fn raw_pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn is_zombie(&self, tid: u32) -> bool {
        process::read_thread_status(self.raw_pid(), tid).state == ThreadState::Zombie
    }

    fn seize(&self) -> Result<()> {
        ptrace::seize(self.pid, ptrace::Options::empty())
            .map_err(|e| Error::from_errno(self.raw_pid(), "attach to", e))
    }

    fn serve(&self, inbox: Receiver<Command>) {
        loop {
            match inbox.recv_timeout(IDLE_POLL) {
                Ok(Command::Registers { tid, reply }) => {
                    let _ = reply.send(self.registers(tid));
                }
                Ok(Command::Detach { reply }) => {
                    let _ = reply.send(self.release());
                    return;
                }
                Err(RecvTimeoutError::Timeout) => self.reap(),
                Err(RecvTimeoutError::Disconnected) => {
                    if let Err(e) = self.release() {
                        log::debug!("release of PID {} failed: {}", self.pid, e);
                    }
                    return;
                }
            }
        }
    }

    fn registers(&self, tid: u32) -> Result<Registers> {
        if self.exited.load(Ordering::Relaxed) {
            return Err(Error::ProcessNotFound(format!("PID {} exited", self.pid)));
        }
        let raw = i32::try_from(tid)
            .map_err(|_| Error::InvalidArgument(format!("TID {} is out of range", tid)))?;
        let thread = Pid::from_raw(raw);

        if self.is_zombie(tid) {
            return Err(Error::Trace(format!("thread {} is a zombie", tid)));
        }
        self.reap();
        if thread == self.pid {
            return self.stop_and_read(thread, true);
        }
        if self.stragglers.borrow().contains(&thread) {
            return Err(Error::Trace(format!("thread {} has not stopped yet", tid)));
        }

        // Other threads are seized only for the length of one read.
        ptrace::seize(thread, ptrace::Options::empty())
            .map_err(|e| Error::from_errno(tid, "seize thread of", e))?;
        self.stop_and_read(thread, false)
    }

    /// Interrupt `thread`, copy its registers, then resume it (or detach
    /// from it when `keep_seized` is false).
    fn stop_and_read(&self, thread: Pid, keep_seized: bool) -> Result<Registers> {
        let tid = thread.as_raw() as u32;
        ptrace::interrupt(thread).map_err(|e| Error::from_errno(tid, "interrupt", e))?;

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let status = match wait_until(thread, deadline) {
                Ok(status) => status,
                Err(e) => {
                    // The interrupt stays queued; reap() finishes the job.
                    if !keep_seized {
                        self.stragglers.borrow_mut().insert(thread);
                    }
                    return Err(e);
                }
            };

            match status {
                WaitStatus::PtraceEvent(_, signal, libc::PTRACE_EVENT_STOP) => {
                    let regs = arch::read_registers(thread)
                        .map_err(|e| Error::from_errno(tid, "read registers of", e));
                    let released = if keep_seized {
                        continue_from_event_stop(thread, signal)
                    } else {
                        ptrace::detach(thread, None)
                    };
                    if let Err(e) = released {
                        log::debug!("failed to resume thread {}: {}", tid, e);
                    }
                    return regs;
                }
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    if thread == self.pid {
                        self.exited.store(true, Ordering::Relaxed);
                    }
                    return Err(Error::ProcessNotFound(format!("thread {} exited", tid)));
                }
                // A signal arrived first; deliver it, the interrupt stays pending.
                other => self
                    .resume(other)
                    .map_err(|e| Error::from_errno(tid, "resume", e))?,
            }
        }
    }

    /// Collect and resume stops nobody asked for (signal delivery, group
    /// stops) so the target does not hang between samples.
    fn reap(&self) {
        self.stragglers
            .borrow_mut()
            .retain(|&thread| !settle_straggler(thread));
        if self.exited.load(Ordering::Relaxed) {
            return;
        }
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::__WALL)) {
                Ok(WaitStatus::StillAlive) | Err(_) => return,
                Ok(status) => {
                    if self.resume(status).is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn resume(&self, status: WaitStatus) -> nix::Result<()> {
        match status {
            WaitStatus::Stopped(thread, signal) => ptrace::cont(thread, signal),
            WaitStatus::PtraceEvent(thread, signal, libc::PTRACE_EVENT_STOP) => {
                continue_from_event_stop(thread, signal)
            }
            WaitStatus::PtraceEvent(thread, _, _) => ptrace::cont(thread, None),
            WaitStatus::Exited(thread, _) | WaitStatus::Signaled(thread, _, _) => {
                if thread == self.pid {
                    log::debug!("traced PID {} exited", self.pid);
                    self.exited.store(true, Ordering::Relaxed);
                }
                Err(Errno::ESRCH)
            }
            _ => Ok(()),
        }
    }

    fn release(&self) -> Result<()> {
        if self.exited.load(Ordering::Relaxed) {
            return Ok(());
        }
        let pid = self.raw_pid();
        self.reap();
        if self.exited.load(Ordering::Relaxed) {
            return Ok(());
        }
        if self.is_zombie(pid) {
            log::debug!("leader of PID {} is a zombie, detach left to tracer exit", pid);
            return Ok(());
        }

        // PTRACE_DETACH needs the tracee in a ptrace-stop.
        ptrace::interrupt(self.pid).map_err(|e| Error::from_errno(pid, "interrupt", e))?;
        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let status = match wait_until(self.pid, deadline) {
                Ok(status) => status,
                Err(Error::Trace(msg)) => {
                    log::debug!("{}, detach left to tracer exit", msg);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            match status {
                WaitStatus::PtraceEvent(_, _, libc::PTRACE_EVENT_STOP) => break,
                WaitStatus::Stopped(_, signal) => {
                    return ptrace::detach(self.pid, signal)
                        .map_err(|e| Error::from_errno(pid, "detach from", e));
                }
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    self.exited.store(true, Ordering::Relaxed);
                    return Ok(());
                }
                _ => continue,
            }
        }
        ptrace::detach(self.pid, None).map_err(|e| Error::from_errno(pid, "detach from", e))
    }
}

/// Next wait status of `tracee`, polled until `deadline`
fn wait_until(tracee: Pid, deadline: Instant) -> Result<WaitStatus> {
    let tid = tracee.as_raw() as u32;
    loop {
        match waitpid(tracee, Some(WaitPidFlag::WNOHANG | WaitPidFlag::__WALL))
            .map_err(|e| Error::from_errno(tid, "wait for", e))?
        {
            WaitStatus::StillAlive if Instant::now() >= deadline => {
                return Err(Error::Trace(format!(
                    "thread {} did not stop within {:?}",
                    tid, STOP_TIMEOUT
                )));
            }
            WaitStatus::StillAlive => thread::sleep(WAIT_POLL),
            status => return Ok(status),
        }
    }
}

/// Detach from a late-stopping thread once its stop shows up. True when
/// the thread is released or gone.
fn settle_straggler(thread: Pid) -> bool {
    match waitpid(thread, Some(WaitPidFlag::WNOHANG | WaitPidFlag::__WALL)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(WaitStatus::PtraceEvent(_, _, libc::PTRACE_EVENT_STOP)) => {
            let _ = ptrace::detach(thread, None);
            true
        }
        Ok(WaitStatus::Stopped(_, signal)) => {
            let _ = ptrace::detach(thread, signal);
            true
        }
        Ok(WaitStatus::PtraceEvent(..)) => ptrace::cont(thread, None).is_err(),
        Ok(_) | Err(_) => true,
    }
}

fn is_group_stop(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU
    )
}

/// Resume from PTRACE_EVENT_STOP. A group stop (the target was sent
/// SIGSTOP and friends) must stay stopped, so it gets PTRACE_LISTEN.
fn continue_from_event_stop(thread: Pid, signal: Signal) -> nix::Result<()> {
    if is_group_stop(signal) {
        // SAFETY: PTRACE_LISTEN ignores addr and data.
        let ret = unsafe { libc::ptrace(libc::PTRACE_LISTEN, thread.as_raw(), 0usize, 0usize) };
        Errno::result(ret).map(drop)
    } else {
        ptrace::cont(thread, None)
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use crate::platform::Registers;
    use nix::sys::ptrace;
    use nix::unistd::Pid;

    pub(super) fn read_registers(thread: Pid) -> nix::Result<Registers> {
        let regs = ptrace::getregs(thread)?;
        Ok(Registers {
            ip: regs.rip,
            fp: regs.rbp,
        })
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use crate::platform::Registers;
    use nix::errno::Errno;
    use nix::unistd::Pid;
    use std::mem::{MaybeUninit, size_of};

    pub(super) fn read_registers(thread: Pid) -> nix::Result<Registers> {
        let mut regs = MaybeUninit::<libc::user_regs_struct>::zeroed();
        let mut iov = libc::iovec {
            iov_base: regs.as_mut_ptr().cast(),
            iov_len: size_of::<libc::user_regs_struct>(),
        };
        // SAFETY: iov points at a buffer of exactly iov_len bytes that
        // outlives the call.
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                thread.as_raw(),
                libc::NT_PRSTATUS as usize,
                &mut iov as *mut libc::iovec,
            )
        };
        Errno::result(ret)?;
        // SAFETY: zero-initialised plain data, filled in by the kernel.
        let regs = unsafe { regs.assume_init() };
        Ok(Registers {
            ip: regs.pc,
            fp: regs.regs[29],
        })
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch {
    use crate::platform::Registers;
    use nix::unistd::Pid;

    pub(super) fn read_registers(_thread: Pid) -> nix::Result<Registers> {
        Err(nix::errno::Errno::ENOSYS)
    }
}
