use runscope_trace::{Engine, ProfileEntry, ProfilerMode, ScopeProbe, profile_scope};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn find<'a>(entries: &'a [ProfileEntry], name: &str) -> &'a ProfileEntry {
    entries
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("no entry named {name}"))
}

#[test]
fn test_outer_inner_scenario() {
    let engine = Engine::new();
    engine.begin_session("S", ProfilerMode::Instrumentation);

    {
        profile_scope!(&engine, "outer");
        thread::sleep(Duration::from_millis(5));
        {
            profile_scope!(&engine, "inner");
            thread::sleep(Duration::from_millis(5));
        }
    }

    engine.end_session();

    let snapshot = engine.session_snapshot().expect("session exists");
    assert_eq!(snapshot.name, "S");
    assert!(!snapshot.active);

    let entries = engine.entries();
    assert_eq!(entries.len(), 2);

    let inner = find(&entries, "inner");
    let outer = find(&entries, "outer");
    assert_eq!(inner.depth, 1);
    assert_eq!(outer.depth, 0);

    assert!(inner.duration_ms() >= 5.0, "inner took {}ms", inner.duration_ms());
    assert!(outer.duration_ms() >= 10.0, "outer took {}ms", outer.duration_ms());
    assert!(outer.start_ns <= inner.start_ns && inner.end_ns <= outer.end_ns);
}

#[test]
fn test_strict_nesting_depths_follow_entry_order() {
    fn descend(engine: &Engine, remaining: u32) {
        if remaining == 0 {
            return;
        }
        let _probe = ScopeProbe::new(engine, format!("level-{remaining}"));
        descend(engine, remaining - 1);
    }

    let engine = Engine::new();
    engine.begin_session("nesting", ProfilerMode::Instrumentation);
    descend(&engine, 8);

    let entries = engine.entries();
    assert_eq!(entries.len(), 8);
    // Innermost is recorded first; outermost last at depth 0.
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.name, format!("level-{}", i + 1));
        assert_eq!(entry.depth, 7 - i as u32);
    }
}

#[test]
fn test_concurrent_probes_are_all_recorded() {
    const THREADS: usize = 10;
    const PER_THREAD: usize = 100;

    let engine = Arc::new(Engine::new());
    engine.begin_session("mt", ProfilerMode::Instrumentation);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let _probe = ScopeProbe::new(&engine, format!("t{t}-{i}"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entries = engine.entries();
    assert_eq!(entries.len(), THREADS * PER_THREAD);
    assert!(entries.iter().all(|e| e.depth == 0));

    let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), THREADS * PER_THREAD);

    let mut threads: Vec<u64> = entries.iter().map(|e| e.thread_id).collect();
    threads.sort_unstable();
    threads.dedup();
    assert_eq!(threads.len(), THREADS);
}

#[test]
fn test_disable_then_reenable() {
    let engine = Engine::new();
    engine.begin_session("toggle", ProfilerMode::Instrumentation);

    engine.set_enabled(false);
    for _ in 0..10 {
        profile_scope!(&engine, "ignored");
    }
    assert!(engine.entries().is_empty());

    engine.set_enabled(true);
    {
        profile_scope!(&engine, "recorded");
    }
    let entries = engine.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "recorded");
}

#[test]
fn test_clear_then_read_is_empty() {
    let engine = Engine::new();
    engine.begin_session("clear", ProfilerMode::Instrumentation);
    for _ in 0..3 {
        profile_scope!(&engine, "x");
    }
    assert_eq!(engine.entries().len(), 3);
    engine.clear();
    assert!(engine.entries().is_empty());
}
