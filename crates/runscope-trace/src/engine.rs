//! Recording engine: owns the current session and routes entries into it.

use crate::entry::ProfileEntry;
use crate::session::{Session, SessionSnapshot};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Which collectors feed the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ProfilerMode {
    #[default]
    Instrumentation = 0,
    Sampling = 1,
    Both = 2,
}

impl ProfilerMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProfilerMode::Sampling,
            2 => ProfilerMode::Both,
            _ => ProfilerMode::Instrumentation,
        }
    }
}

impl fmt::Display for ProfilerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfilerMode::Instrumentation => "instrumentation",
            ProfilerMode::Sampling => "sampling",
            ProfilerMode::Both => "both",
        };
        f.write_str(name)
    }
}

/// Coordinator holding at most one current [`Session`].
///
/// Construct one per program (usually behind an `Arc`) and hand it to every
/// probe and sampler that should record into it. Readers only ever get
/// copies of the session's entries.
#[derive(Debug)]
pub struct Engine {
    session: Mutex<Option<Session>>,
    enabled: AtomicBool,
    mode: AtomicU8,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            session: Mutex::new(None),
            enabled: AtomicBool::new(true),
            mode: AtomicU8::new(ProfilerMode::Instrumentation as u8),
        }
    }

    /// Start a fresh session, discarding the previous one.
    pub fn begin_session(&self, name: impl Into<String>, mode: ProfilerMode) {
        let session = Session::new(name);
        let mut current = self.lock();
        self.mode.store(mode as u8, Ordering::Release);
        log::debug!("begin session '{}' ({mode})", session.name());
        if let Some(previous) = current.replace(session) {
            log::debug!(
                "replaced session '{}' with {} entries",
                previous.name(),
                previous.entry_count()
            );
        }
    }

    pub fn end_session(&self) {
        if let Some(session) = self.lock().as_ref() {
            session.end();
            log::debug!(
                "end session '{}' after {:?}, {} entries",
                session.name(),
                session.elapsed(),
                session.entry_count()
            );
        }
    }

    /// Record one entry. No-op while disabled or without an active session.
    pub fn record_entry(&self, entry: ProfileEntry) {
        if !self.is_enabled() {
            return;
        }
        if let Some(session) = self.lock().as_mut() {
            session.add_entry(entry);
        }
    }

    /// Record a batch under a single lock acquisition.
    pub fn record_entries(&self, entries: impl IntoIterator<Item = ProfileEntry>) {
        if !self.is_enabled() {
            return;
        }
        if let Some(session) = self.lock().as_ref() {
            session.extend_shared(entries);
        }
    }

    /// True when a session exists and has not ended.
    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(Session::is_active)
    }

    pub fn mode(&self) -> ProfilerMode {
        ProfilerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Copy of the current session's entries (empty without a session).
    pub fn entries(&self) -> Vec<ProfileEntry> {
        self.lock()
            .as_ref()
            .map(Session::entries)
            .unwrap_or_default()
    }

    pub fn session_snapshot(&self) -> Option<SessionSnapshot> {
        self.lock().as_ref().map(Session::snapshot)
    }

    pub fn clear(&self) {
        if let Some(session) = self.lock().as_ref() {
            session.clear();
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(name: &str) -> ProfileEntry {
        ProfileEntry::new(name, 0, 1_000)
    }

    #[test]
    fn test_no_session_records_nothing() {
        let engine = Engine::new();
        engine.record_entry(entry("lost"));
        assert!(engine.entries().is_empty());
        assert!(!engine.is_active());
        assert!(engine.session_snapshot().is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let engine = Engine::new();
        engine.begin_session("s", ProfilerMode::Both);
        assert!(engine.is_active());
        assert_eq!(engine.mode(), ProfilerMode::Both);

        engine.record_entry(entry("a"));
        engine.end_session();
        engine.record_entry(entry("after end"));

        assert!(!engine.is_active());
        let entries = engine.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
    }

    #[test]
    fn test_begin_replaces_previous_session() {
        let engine = Engine::new();
        engine.begin_session("first", ProfilerMode::Instrumentation);
        engine.record_entry(entry("old"));
        engine.begin_session("second", ProfilerMode::Sampling);

        assert!(engine.entries().is_empty());
        assert_eq!(engine.session_snapshot().unwrap().name, "second");
        assert_eq!(engine.mode(), ProfilerMode::Sampling);
    }

    #[test]
    fn test_disable_gates_recording() {
        let engine = Engine::new();
        engine.begin_session("s", ProfilerMode::Instrumentation);
        engine.set_enabled(false);
        engine.record_entry(entry("dropped"));
        engine.record_entries(vec![entry("dropped too")]);
        assert!(engine.entries().is_empty());
        assert!(engine.is_active());

        engine.set_enabled(true);
        engine.record_entry(entry("kept"));
        assert_eq!(engine.entries().len(), 1);
    }

    #[test]
    fn test_record_entries_batch() {
        let engine = Engine::new();
        engine.begin_session("s", ProfilerMode::Sampling);
        engine.record_entries((0..5).map(|i| entry(&format!("e{i}"))));
        assert_eq!(engine.entries().len(), 5);
    }

    #[test]
    fn test_clear_while_writers_active() {
        let engine = Arc::new(Engine::new());
        engine.begin_session("s", ProfilerMode::Instrumentation);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        engine.record_entry(entry(&format!("e-{i}")));
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            engine.clear();
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(engine.entries().len() <= 2000);
        engine.clear();
        assert!(engine.entries().is_empty());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ProfilerMode::Instrumentation.to_string(), "instrumentation");
        assert_eq!(ProfilerMode::Both.to_string(), "both");
    }
}
