//! In-process instrumentation for runscope.
//!
//! Programs annotate scopes with probes; each probe records one
//! [`ProfileEntry`] into an [`Engine`] when its scope ends:
//!
//! ```rust
//! use runscope_trace::{Engine, ProfilerMode, profile_scope};
//!
//! let engine = Engine::new();
//! engine.begin_session("startup", ProfilerMode::Instrumentation);
//! {
//!     profile_scope!(&engine, "load_config");
//!     // ...
//! }
//! engine.end_session();
//! assert_eq!(engine.entries().len(), 1);
//! ```
//!
//! The engine is an ordinary value: share it with `Arc` across threads.
//! Nesting depth is tracked per thread, so probes on different threads
//! never interfere.
//!
//! Build with the `disabled` feature to compile the macros down to nothing.
//!
//! The same [`ProfileEntry`] shape is produced by the out-of-process
//! sampler in the `runscope` crate, so consumers do not care which
//! collector produced an entry.

pub mod clock;
pub mod depth;
pub mod engine;
pub mod entry;
pub mod probe;
pub mod session;

pub use clock::{Clock, TimePoint};
pub use depth::{DepthCounter, DepthGuard, current_depth, current_thread_id};
pub use engine::{Engine, ProfilerMode};
pub use entry::ProfileEntry;
pub use probe::ScopeProbe;
pub use session::{Session, SessionSnapshot};
