mod info;
#[cfg(target_os = "linux")]
mod maps;

pub use info::{
    ProcessInfo, ThreadState, ThreadStatus, enumerate_processes, find_process_by_name,
    is_process_running, parse_stat_line,
};
#[cfg(target_os = "linux")]
pub use info::{has_live_threads, read_thread_status, thread_ids};
#[cfg(target_os = "linux")]
pub use maps::{MemoryMapping, MemoryMaps, Module};
