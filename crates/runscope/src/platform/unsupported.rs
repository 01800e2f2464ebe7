use crate::error::{Error, Result};
use crate::platform::{Registers, RemoteMemory, Tracer};
use crate::process::ThreadStatus;

/// Stand-in for OSes without a tracing backend; every attach fails.
#[derive(Default)]
pub struct NativeTracer;

impl NativeTracer {
    pub fn new() -> Self {
        NativeTracer
    }
}

impl Tracer for NativeTracer {
    fn attach(&mut self, pid: u32) -> Result<()> {
        Err(Error::UnsupportedPlatform(format!(
            "cannot attach to PID {} on {}",
            pid,
            std::env::consts::OS
        )))
    }

    fn detach(&mut self) -> Result<()> {
        Ok(())
    }

    fn enumerate_threads(&mut self) -> Result<Vec<u32>> {
        Err(Error::NotAttached)
    }

    fn thread_state(&mut self, tid: u32) -> ThreadStatus {
        ThreadStatus::unknown(tid)
    }

    fn read_registers(&mut self, _tid: u32) -> Result<Registers> {
        Err(Error::NotAttached)
    }

    fn is_alive(&self) -> bool {
        false
    }
}

impl RemoteMemory for NativeTracer {
    fn read_word(&self, _addr: u64) -> Option<u64> {
        None
    }
}
