//! The timed span shared by instrumentation and sampling.

/// One timed, named span of execution.
///
/// Instrumentation emits flat entries (depth carries the nesting). The
/// sampler emits one root per target thread whose children are the
/// unwound frames, owned by value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileEntry {
    pub name: String,
    pub file: Option<String>,
    pub line: u32,
    pub start_ns: i64,
    pub end_ns: i64,
    pub thread_id: u64,
    pub depth: u32,
    pub memory_used: u64,
    /// Not computed by either collector yet; always 0.0.
    pub cpu_usage: f64,
    pub children: Vec<ProfileEntry>,
}

impl ProfileEntry {
    pub fn new(name: impl Into<String>, start_ns: i64, end_ns: i64) -> Self {
        ProfileEntry {
            name: name.into(),
            start_ns,
            end_ns,
            ..Default::default()
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        let file = file.into();
        if !file.is_empty() {
            self.file = Some(file);
            self.line = line;
        }
        self
    }

    pub fn with_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn push_child(&mut self, child: ProfileEntry) {
        self.children.push(child);
    }

    /// Span length. A span whose end precedes its start counts as zero.
    pub fn duration_ns(&self) -> i64 {
        self.end_ns.saturating_sub(self.start_ns).max(0)
    }

    pub fn duration_us(&self) -> f64 {
        self.duration_ns() as f64 / 1_000.0
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ns() as f64 / 1_000_000.0
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_ns() as f64 / 1_000_000_000.0
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Depth-first walk over this entry and all of its descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Iterator returned by [`ProfileEntry::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a ProfileEntry>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ProfileEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.stack.pop()?;
        self.stack.extend(entry.children.iter().rev());
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        let entry = ProfileEntry::new("work", 1_000_000, 3_500_000);
        assert_eq!(entry.duration_ns(), 2_500_000);
        assert_eq!(entry.duration_us(), 2_500.0);
        assert_eq!(entry.duration_ms(), 2.5);
        assert_eq!(entry.duration_s(), 0.0025);
    }

    #[test]
    fn test_inverted_span_is_zero_duration() {
        let entry = ProfileEntry::new("backwards", 10, 5);
        assert_eq!(entry.duration_ns(), 0);
        assert_eq!(entry.duration_ms(), 0.0);

        let extreme = ProfileEntry::new("extreme", i64::MAX, i64::MIN);
        assert_eq!(extreme.duration_ns(), 0);
    }

    #[test]
    fn test_empty_location_is_ignored() {
        let entry = ProfileEntry::new("x", 0, 1).with_location("", 12);
        assert_eq!(entry.file, None);
        assert_eq!(entry.line, 0);

        let entry = ProfileEntry::new("x", 0, 1).with_location("src/lib.rs", 12);
        assert_eq!(entry.file.as_deref(), Some("src/lib.rs"));
        assert_eq!(entry.line, 12);
    }

    #[test]
    fn test_walk_visits_depth_first() {
        let mut root = ProfileEntry::new("root", 0, 10);
        let mut a = ProfileEntry::new("a", 0, 5).with_depth(1);
        a.push_child(ProfileEntry::new("a1", 0, 2).with_depth(2));
        root.push_child(a);
        root.push_child(ProfileEntry::new("b", 5, 10).with_depth(1));

        let names: Vec<&str> = root.walk().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["root", "a", "a1", "b"]);
        assert_eq!(root.child_count(), 2);
        assert!(root.has_children());
    }
}
