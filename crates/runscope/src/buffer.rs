use runscope_trace::ProfileEntry;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Sampled entries kept per attacher
pub const SAMPLE_CAPACITY: usize = 1000;

/// Receives the root entries of one sampling tick
pub type SampleCallback = Arc<dyn Fn(&[ProfileEntry]) + Send + Sync>;

/// Bounded FIFO of sampled root entries plus the delivery callback.
///
/// Both live behind the same lock so that a tick's append and the
/// callback it will be delivered to are always consistent.
pub struct SampleBuffer {
    entries: VecDeque<ProfileEntry>,
    capacity: usize,
    callback: Option<SampleCallback>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SampleBuffer {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            callback: None,
        }
    }

    /// Append a tick's entries, evicting the oldest beyond capacity.
    /// Returns how many entries were evicted.
    pub fn push_batch(&mut self, batch: &[ProfileEntry]) -> usize {
        let mut evicted = 0;
        for entry in batch {
            if self.entries.len() == self.capacity {
                if self.capacity == 0 {
                    evicted += 1;
                    continue;
                }
                self.entries.pop_front();
                evicted += 1;
            }
            self.entries.push_back(entry.clone());
        }
        evicted
    }

    /// Oldest-first copy of the buffered entries
    pub fn entries(&self) -> Vec<ProfileEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn set_callback(&mut self, callback: SampleCallback) {
        self.callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Clone of the registered callback, to be invoked after the lock is released
    pub fn callback(&self) -> Option<SampleCallback> {
        self.callback.clone()
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(n: i64) -> ProfileEntry {
        ProfileEntry::new(format!("sample-{n}"), n, n + 1)
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = SampleBuffer::with_capacity(3);
        assert_eq!(buffer.push_batch(&[entry(1), entry(2)]), 0);
        assert_eq!(buffer.push_batch(&[entry(3), entry(4), entry(5)]), 2);

        let names: Vec<_> = buffer.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["sample-3", "sample-4", "sample-5"]);
    }

    #[test]
    fn test_default_capacity_holds_last_thousand() {
        let mut buffer = SampleBuffer::new();
        for tick in 0..1500 {
            buffer.push_batch(&[entry(tick)]);
        }
        assert_eq!(buffer.len(), SAMPLE_CAPACITY);

        let entries = buffer.entries();
        assert_eq!(entries.first().unwrap().start_ns, 500);
        assert_eq!(entries.last().unwrap().start_ns, 1499);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buffer = SampleBuffer::with_capacity(0);
        assert_eq!(buffer.push_batch(&[entry(1)]), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_callback_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut buffer = SampleBuffer::new();
        assert!(buffer.callback().is_none());

        let seen = Arc::clone(&calls);
        buffer.set_callback(Arc::new(move |batch: &[ProfileEntry]| {
            seen.fetch_add(batch.len(), Ordering::SeqCst);
        }));
        let callback = buffer.callback().unwrap();
        callback(&[entry(1), entry(2)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        buffer.clear_callback();
        assert!(buffer.callback().is_none());
    }

    #[test]
    fn test_clear() {
        let mut buffer = SampleBuffer::new();
        buffer.push_batch(&[entry(1)]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), SAMPLE_CAPACITY);
    }
}
