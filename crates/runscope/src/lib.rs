//! Attach to a running process and sample its threads' call stacks.
//!
//! [`ProcessAttacher`] ties together the pieces: a platform [`Tracer`]
//! (ptrace on Linux, task ports on macOS), the frame-pointer [`unwind`]er,
//! the [`SymbolResolver`] and a bounded [`SampleBuffer`]. Samples come out
//! as [`ProfileEntry`] trees, the same type `runscope-trace` records for
//! in-process instrumentation.
//!
//! Stacks are only as good as the target's frame pointers: build targets
//! with `-C force-frame-pointers=yes` for full stacks.
//!
//! [`Tracer`]: platform::Tracer
//! [`unwind`]: unwind::unwind

pub mod attacher;
pub mod buffer;
pub mod cli;
pub mod commands;
pub mod error;
pub mod platform;
pub mod process;
pub mod symbols;
pub mod unwind;

pub use attacher::{AttachmentStatus, DEFAULT_SAMPLE_RATE, MAX_SAMPLE_RATE, ProcessAttacher};
pub use buffer::{SAMPLE_CAPACITY, SampleBuffer, SampleCallback};
pub use error::{Error, Result};
pub use platform::{NativeTracer, Registers, RemoteMemory, Tracer};
pub use runscope_trace::{Clock, Engine, ProfileEntry, ProfilerMode};
pub use symbols::SymbolResolver;
pub use unwind::MAX_FRAMES;
