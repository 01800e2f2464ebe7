//! One recording interval's worth of entries.

use crate::clock::{Clock, TimePoint};
use crate::entry::ProfileEntry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

/// Append-only log of entries for one recording interval.
///
/// Adding to an inactive session is a silent no-op: recording is off.
#[derive(Debug)]
pub struct Session {
    name: String,
    start: TimePoint,
    end: OnceLock<TimePoint>,
    active: AtomicBool,
    entries: Mutex<Vec<ProfileEntry>>,
}

/// Point-in-time copy of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub name: String,
    pub start_ns: i64,
    pub end_ns: Option<i64>,
    pub active: bool,
    pub entries: Vec<ProfileEntry>,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Session {
            name: name.into(),
            start: Clock::now(),
            end: OnceLock::new(),
            active: AtomicBool::new(true),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_time(&self) -> TimePoint {
        self.start
    }

    pub fn start_ns(&self) -> i64 {
        Clock::to_nanoseconds(&self.start)
    }

    /// `None` until the session has ended.
    pub fn end_ns(&self) -> Option<i64> {
        self.end.get().map(Clock::to_nanoseconds)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Time from start to end, or to now while still active.
    pub fn elapsed(&self) -> Duration {
        let end = self.end.get().copied().unwrap_or_else(Clock::now);
        end.since_epoch().saturating_sub(self.start.since_epoch())
    }

    /// Append with exclusive access; no locking involved.
    pub fn add_entry(&mut self, entry: ProfileEntry) {
        if !self.is_active() {
            return;
        }
        self.entries
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Append from any thread.
    pub fn add_entry_shared(&self, entry: ProfileEntry) {
        if !self.is_active() {
            return;
        }
        self.lock().push(entry);
    }

    pub(crate) fn extend_shared(&self, entries: impl IntoIterator<Item = ProfileEntry>) {
        if !self.is_active() {
            return;
        }
        self.lock().extend(entries);
    }

    /// Copy of every entry recorded so far.
    pub fn entries(&self) -> Vec<ProfileEntry> {
        self.lock().clone()
    }

    pub fn entry_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Stop accepting entries. Ending twice keeps the first end time.
    pub fn end(&self) {
        let _ = self.end.set(Clock::now());
        self.active.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.name.clone(),
            start_ns: self.start_ns(),
            end_ns: self.end_ns(),
            active: self.is_active(),
            entries: self.entries(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProfileEntry>> {
        // A writer that panicked mid-push leaves the vector intact.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_active() {
            self.end();
            log::trace!(
                "session '{}' dropped while active, ended implicitly",
                self.name
            );
        }
    }
}
