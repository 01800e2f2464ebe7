//! Mach task-port backend.
//!
//! `task_for_pid` needs root or the `com.apple.security.cs.debugger`
//! entitlement, and the target must not be hardened against it.

use crate::error::{Error, Result};
use crate::platform::{Registers, RemoteMemory, Tracer};
use crate::process::{self, ThreadState, ThreadStatus};
use libc::{
    THREAD_EXTENDED_INFO, THREAD_EXTENDED_INFO_COUNT, THREAD_IDENTIFIER_INFO,
    THREAD_IDENTIFIER_INFO_COUNT, thread_extended_info, thread_flavor_t,
    thread_identifier_info, thread_info,
};
use mach2::kern_return::{KERN_SUCCESS, kern_return_t};
use mach2::mach_port::mach_port_deallocate;
use mach2::mach_types::{thread_act_array_t, thread_act_t};
use mach2::message::mach_msg_type_number_t;
use mach2::port::{MACH_PORT_NULL, mach_port_name_t};
use mach2::task::task_threads;
use mach2::thread_act::{thread_get_state, thread_resume, thread_suspend};
use mach2::traps::{mach_task_self, task_for_pid};
use mach2::vm::{mach_vm_deallocate, mach_vm_read_overwrite};
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};
use std::collections::HashMap;
use std::ffi::CStr;
use std::mem::size_of;

macro_rules! check_mach {
    ($ret:expr, $what:expr) => {{
        let ret: kern_return_t = $ret;
        if ret == KERN_SUCCESS {
            Ok(())
        } else {
            Err(Error::Trace(format!("{} failed: kern_return_t {}", $what, ret)))
        }
    }};
}

// thread_basic_info run states
const TH_STATE_RUNNING: i32 = 1;
const TH_STATE_STOPPED: i32 = 2;
const TH_STATE_WAITING: i32 = 3;
const TH_STATE_UNINTERRUPTIBLE: i32 = 4;
const TH_STATE_HALTED: i32 = 5;

/// macOS [`Tracer`]
#[derive(Default)]
pub struct NativeTracer {
    pid: u32,
    task: Option<mach_port_name_t>,
    /// Thread ports from the last enumeration, keyed by system thread id
    threads: HashMap<u32, thread_act_t>,
}

impl NativeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn release_threads(&mut self) {
        for (_, port) in self.threads.drain() {
            // SAFETY: each port is a send right we received from task_threads.
            unsafe { mach_port_deallocate(mach_task_self(), port) };
        }
    }

    fn thread_port(&self, tid: u32) -> Result<thread_act_t> {
        self.threads
            .get(&tid)
            .copied()
            .ok_or_else(|| Error::Trace(format!("unknown thread {}", tid)))
    }
}

fn system_thread_id(port: thread_act_t) -> Option<u64> {
    let mut info: thread_identifier_info = unsafe { std::mem::zeroed() };
    let mut count = THREAD_IDENTIFIER_INFO_COUNT;
    // SAFETY: info is large enough for THREAD_IDENTIFIER_INFO_COUNT words.
    let ret = unsafe {
        thread_info(
            port,
            THREAD_IDENTIFIER_INFO as thread_flavor_t,
            &mut info as *mut _ as *mut _,
            &mut count,
        )
    };
    (ret == KERN_SUCCESS).then_some(info.thread_id)
}

fn run_state(state: i32) -> ThreadState {
    match state {
        TH_STATE_RUNNING => ThreadState::Running,
        TH_STATE_STOPPED => ThreadState::Stopped,
        TH_STATE_WAITING => ThreadState::Sleeping,
        TH_STATE_UNINTERRUPTIBLE => ThreadState::DiskSleep,
        TH_STATE_HALTED => ThreadState::Zombie,
        _ => ThreadState::Unknown,
    }
}

impl Tracer for NativeTracer {
    fn attach(&mut self, pid: u32) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::AlreadyAttached(self.pid));
        }
        if !process::is_process_running(pid) {
            return Err(Error::ProcessNotFound(format!("PID {}", pid)));
        }
        let raw = libc::c_int::try_from(pid)
            .map_err(|_| Error::InvalidArgument(format!("PID {} is out of range", pid)))?;

        let mut task: mach_port_name_t = MACH_PORT_NULL;
        // SAFETY: task is a valid out-pointer.
        let ret = unsafe { task_for_pid(mach_task_self(), raw, &mut task) };
        if ret != KERN_SUCCESS {
            return Err(Error::PermissionDenied(format!(
                "task_for_pid({}) returned {}. Run as root or sign with the debugger entitlement",
                pid, ret
            )));
        }

        self.pid = pid;
        self.task = Some(task);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.release_threads();
        if let Some(task) = self.task.take() {
            // SAFETY: task is the send right returned by task_for_pid.
            unsafe { check_mach!(mach_port_deallocate(mach_task_self(), task), "mach_port_deallocate")? };
        }
        Ok(())
    }

    fn enumerate_threads(&mut self) -> Result<Vec<u32>> {
        let task = self.task.ok_or(Error::NotAttached)?;
        self.release_threads();

        let mut list: thread_act_array_t = std::ptr::null_mut();
        let mut count: mach_msg_type_number_t = 0;
        // SAFETY: out-pointers are valid; the array is freed by the guard.
        unsafe { check_mach!(task_threads(task, &mut list, &mut count), "task_threads")? };
        let list = scopeguard::guard(list, |p| unsafe {
            mach_vm_deallocate(
                mach_task_self(),
                p as mach_vm_address_t,
                (count as usize * size_of::<thread_act_t>()) as mach_vm_size_t,
            );
        });

        // SAFETY: task_threads returned `count` ports at `list`.
        let ports = unsafe { std::slice::from_raw_parts(*list, count as usize) };
        let mut tids = Vec::with_capacity(ports.len());
        for &port in ports {
            match system_thread_id(port) {
                Some(id) => {
                    let tid = id as u32;
                    self.threads.insert(tid, port);
                    tids.push(tid);
                }
                None => {
                    // Thread went away between the two calls.
                    unsafe { mach_port_deallocate(mach_task_self(), port) };
                }
            }
        }
        Ok(tids)
    }

    fn thread_state(&mut self, tid: u32) -> ThreadStatus {
        let Ok(port) = self.thread_port(tid) else {
            return ThreadStatus::unknown(tid);
        };

        let mut info: thread_extended_info = unsafe { std::mem::zeroed() };
        let mut count = THREAD_EXTENDED_INFO_COUNT;
        // SAFETY: info is large enough for THREAD_EXTENDED_INFO_COUNT words.
        let ret = unsafe {
            thread_info(
                port,
                THREAD_EXTENDED_INFO as thread_flavor_t,
                &mut info as *mut _ as *mut _,
                &mut count,
            )
        };
        if ret != KERN_SUCCESS {
            return ThreadStatus::unknown(tid);
        }

        let name_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(info.pth_name.as_ptr() as *const u8, info.pth_name.len())
        };
        let name = CStr::from_bytes_until_nul(name_bytes)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        ThreadStatus {
            name: if name.is_empty() {
                format!("Thread-{}", tid)
            } else {
                name
            },
            state: run_state(info.pth_run_state),
        }
    }

    fn read_registers(&mut self, tid: u32) -> Result<Registers> {
        if self.task.is_none() {
            return Err(Error::NotAttached);
        }
        let port = self.thread_port(tid)?;

        // SAFETY: port is a live thread send right.
        unsafe { check_mach!(thread_suspend(port), "thread_suspend")? };
        let _resume = scopeguard::guard(port, |p| unsafe {
            thread_resume(p);
        });

        arch::read_registers(port)
    }

    fn is_alive(&self) -> bool {
        self.task.is_some() && process::is_process_running(self.pid)
    }
}

impl RemoteMemory for NativeTracer {
    fn read_word(&self, addr: u64) -> Option<u64> {
        let task = self.task?;
        let mut word: u64 = 0;
        let mut read: mach_vm_size_t = 0;
        // SAFETY: the destination is our own 8-byte local.
        let ret = unsafe {
            mach_vm_read_overwrite(
                task,
                addr,
                size_of::<u64>() as mach_vm_size_t,
                &mut word as *mut u64 as mach_vm_address_t,
                &mut read,
            )
        };
        (ret == KERN_SUCCESS && read == size_of::<u64>() as mach_vm_size_t).then_some(word)
    }
}

impl Drop for NativeTracer {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            log::warn!("failed to release task port: {}", e);
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use super::*;
    use mach2::structs::x86_thread_state64_t;
    use mach2::thread_status::x86_THREAD_STATE64;

    pub(super) fn read_registers(port: thread_act_t) -> Result<Registers> {
        let mut state: x86_thread_state64_t = unsafe { std::mem::zeroed() };
        let mut count = x86_thread_state64_t::count();
        // SAFETY: state holds `count` words of x86_THREAD_STATE64.
        unsafe {
            check_mach!(
                thread_get_state(
                    port,
                    x86_THREAD_STATE64,
                    &mut state as *mut _ as *mut _,
                    &mut count,
                ),
                "thread_get_state"
            )?
        };
        Ok(Registers {
            ip: state.__rip,
            fp: state.__rbp,
        })
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use super::*;
    use mach2::structs::arm_thread_state64_t;
    use mach2::thread_status::ARM_THREAD_STATE64;

    pub(super) fn read_registers(port: thread_act_t) -> Result<Registers> {
        let mut state: arm_thread_state64_t = unsafe { std::mem::zeroed() };
        let mut count = arm_thread_state64_t::count();
        // SAFETY: state holds `count` words of ARM_THREAD_STATE64.
        unsafe {
            check_mach!(
                thread_get_state(
                    port,
                    ARM_THREAD_STATE64,
                    &mut state as *mut _ as *mut _,
                    &mut count,
                ),
                "thread_get_state"
            )?
        };
        // Strip pointer-authentication bits.
        const ADDR_MASK: u64 = 0x0000_7fff_ffff_ffff;
        Ok(Registers {
            ip: state.__pc & ADDR_MASK,
            fp: state.__fp & ADDR_MASK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_states() {
        assert_eq!(run_state(TH_STATE_RUNNING), ThreadState::Running);
        assert_eq!(run_state(TH_STATE_WAITING), ThreadState::Sleeping);
        assert_eq!(run_state(99), ThreadState::Unknown);
    }

    #[test]
    fn test_unattached_tracer() {
        let mut tracer = NativeTracer::new();
        assert!(!tracer.is_alive());
        assert!(tracer.read_word(0x1000).is_none());
        assert!(matches!(tracer.read_registers(1), Err(Error::NotAttached)));
        assert!(tracer.detach().is_ok());
    }
}
