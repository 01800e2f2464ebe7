//! RAII timing probe bound to a lexical scope.

use crate::clock::{Clock, TimePoint};
use crate::depth::{DepthGuard, current_thread_id};
use crate::engine::Engine;
use crate::entry::ProfileEntry;
use std::borrow::Cow;

/// Times the scope it lives in and records one entry when dropped.
///
/// The entry is emitted on every exit path (normal return, `?`, panic
/// unwinding) and in drop order, so nested probes are recorded innermost
/// first. Nothing is emitted if the engine is disabled at drop time.
///
/// Usually created through [`profile_scope!`](crate::profile_scope) or
/// [`profile_function!`](crate::profile_function).
#[must_use = "a probe measures until it is dropped; bind it to a named variable"]
pub struct ScopeProbe<'a> {
    engine: &'a Engine,
    name: Cow<'static, str>,
    file: &'static str,
    line: u32,
    start: TimePoint,
    // Declared last: the depth is released after the entry is recorded.
    depth: DepthGuard,
}

impl<'a> ScopeProbe<'a> {
    pub fn new(engine: &'a Engine, name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_location(engine, name, "", 0)
    }

    pub fn with_location(
        engine: &'a Engine,
        name: impl Into<Cow<'static, str>>,
        file: &'static str,
        line: u32,
    ) -> Self {
        let depth = DepthGuard::enter();
        ScopeProbe {
            engine,
            name: name.into(),
            file,
            line,
            start: Clock::now(),
            depth,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> u32 {
        self.depth.depth()
    }
}

impl Drop for ScopeProbe<'_> {
    fn drop(&mut self) {
        let end = Clock::now();
        if !self.engine.is_enabled() {
            return;
        }

        let name = std::mem::take(&mut self.name);
        let entry = ProfileEntry::new(
            name,
            Clock::to_nanoseconds(&self.start),
            Clock::to_nanoseconds(&end),
        )
        .with_location(self.file, self.line)
        .with_thread(current_thread_id())
        .with_depth(self.depth.depth());

        self.engine.record_entry(entry);
    }
}

#[doc(hidden)]
pub fn __type_name_of<T>(_: &T) -> &'static str {
    std::any::type_name::<T>()
}

#[doc(hidden)]
pub fn __function_name(marker_path: &'static str) -> &'static str {
    let mut name = marker_path.strip_suffix("::__runscope_marker").unwrap_or(marker_path);
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// Profile the rest of the enclosing scope under `name`.
///
/// ```rust,ignore
/// let engine = runscope_trace::Engine::new();
/// runscope_trace::profile_scope!(&engine, "load_config");
/// ```
#[macro_export]
#[cfg(not(feature = "disabled"))]
macro_rules! profile_scope {
    ($engine:expr, $name:expr) => {
        let _runscope_probe = $crate::ScopeProbe::with_location($engine, $name, file!(), line!());
    };
}

/// Profile the rest of the enclosing function under its path.
#[macro_export]
#[cfg(not(feature = "disabled"))]
macro_rules! profile_function {
    ($engine:expr) => {
        fn __runscope_marker() {}
        let _runscope_probe = $crate::ScopeProbe::with_location(
            $engine,
            $crate::probe::__function_name($crate::probe::__type_name_of(&__runscope_marker)),
            file!(),
            line!(),
        );
    };
}

/// No-op when probes are compiled out.
#[macro_export]
#[cfg(feature = "disabled")]
macro_rules! profile_scope {
    ($engine:expr, $name:expr) => {
        let _ = &$engine;
    };
}

/// No-op when probes are compiled out.
#[macro_export]
#[cfg(feature = "disabled")]
macro_rules! profile_function {
    ($engine:expr) => {
        let _ = &$engine;
    };
}

#[cfg(all(test, not(feature = "disabled")))]
mod tests {
    use super::*;
    use crate::engine::ProfilerMode;

    fn recording_engine() -> Engine {
        let engine = Engine::new();
        engine.begin_session("probe-test", ProfilerMode::Instrumentation);
        engine
    }

    #[test]
    fn test_probe_emits_once_on_drop() {
        let engine = recording_engine();
        {
            let probe = ScopeProbe::new(&engine, "work");
            assert_eq!(probe.depth(), 0);
            assert!(engine.entries().is_empty());
        }
        let entries = engine.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "work");
        assert_eq!(entries[0].thread_id, current_thread_id());
        assert!(entries[0].end_ns >= entries[0].start_ns);
    }

    #[test]
    fn test_nested_probes_record_lifo_with_depth() {
        let engine = recording_engine();
        {
            let _a = ScopeProbe::new(&engine, "a");
            {
                let _b = ScopeProbe::new(&engine, "b");
                let _c = ScopeProbe::new(&engine, "c");
            }
        }
        let recorded: Vec<(String, u32)> = engine
            .entries()
            .into_iter()
            .map(|e| (e.name, e.depth))
            .collect();
        assert_eq!(
            recorded,
            [("c".to_string(), 2), ("b".to_string(), 1), ("a".to_string(), 0)]
        );
    }

    #[test]
    fn test_probe_records_on_early_return() {
        fn fallible(engine: &Engine, fail: bool) -> Result<u32, &'static str> {
            let _probe = ScopeProbe::new(engine, "fallible");
            if fail {
                return Err("nope");
            }
            Ok(1)
        }

        let engine = recording_engine();
        assert!(fallible(&engine, true).is_err());
        assert!(fallible(&engine, false).is_ok());
        assert_eq!(engine.entries().len(), 2);
        assert_eq!(crate::depth::current_depth(), 0);
    }

    #[test]
    fn test_disabled_engine_keeps_depth_consistent() {
        let engine = recording_engine();
        {
            let _outer = ScopeProbe::new(&engine, "outer");
            engine.set_enabled(false);
            {
                let _hidden = ScopeProbe::new(&engine, "hidden");
            }
            engine.set_enabled(true);
            {
                let inner = ScopeProbe::new(&engine, "inner");
                assert_eq!(inner.depth(), 1);
            }
        }
        let names: Vec<String> = engine.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["inner", "outer"]);
    }

    #[test]
    fn test_macros_capture_location_and_function() {
        fn instrumented(engine: &Engine) {
            crate::profile_function!(engine);
            crate::profile_scope!(engine, "block");
        }

        let engine = recording_engine();
        instrumented(&engine);

        let entries = engine.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "block");
        assert_eq!(entries[0].depth, 1);
        assert!(entries[1].name.ends_with("instrumented"), "{}", entries[1].name);
        assert!(entries[1].file.as_deref().is_some_and(|f| f.ends_with("probe.rs")));
        assert!(entries[1].line > 0);
    }

    #[test]
    fn test_function_name_strips_marker_and_closures() {
        assert_eq!(__function_name("app::run::__runscope_marker"), "app::run");
        assert_eq!(
            __function_name("app::run::{{closure}}::{{closure}}::__runscope_marker"),
            "app::run"
        );
    }
}
