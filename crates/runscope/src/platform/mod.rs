//! OS tracing backends.
//!
//! Everything above this module (unwinder, symbolizer, sampler) talks to
//! the target through [`Tracer`] and [`RemoteMemory`]; exactly one
//! [`NativeTracer`] is compiled in per target OS.

use crate::error::Result;
use crate::process::ThreadStatus;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported;

#[cfg(target_os = "linux")]
pub use linux::NativeTracer;
#[cfg(target_os = "macos")]
pub use macos::NativeTracer;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub use unsupported::NativeTracer;

/// The two registers a frame-pointer walk needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    /// Instruction pointer (`rip` / `pc`)
    pub ip: u64,
    /// Frame pointer (`rbp` / `x29`)
    pub fp: u64,
}

/// Word-sized reads from the target's address space.
pub trait RemoteMemory {
    /// Read one native-endian 64-bit word, `None` if unmapped or unreadable.
    fn read_word(&self, addr: u64) -> Option<u64>;
}

/// A tracing relationship with one target process.
///
/// Implementations must leave no OS-level state behind once `attach` fails
/// or `detach` returns.
pub trait Tracer: RemoteMemory + Send + 'static {
    fn attach(&mut self, pid: u32) -> Result<()>;

    /// Release the target. A no-op when not attached.
    fn detach(&mut self) -> Result<()>;

    /// Live thread ids of the target
    fn enumerate_threads(&mut self) -> Result<Vec<u32>>;

    /// Best-effort name and scheduler state of `tid`
    fn thread_state(&mut self, tid: u32) -> ThreadStatus;

    fn read_registers(&mut self, tid: u32) -> Result<Registers>;

    /// Whether the target still exists (and has not become a zombie)
    fn is_alive(&self) -> bool;
}
