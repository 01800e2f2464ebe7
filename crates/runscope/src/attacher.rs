//! Out-of-process sampling of one target.

use crate::buffer::{SampleBuffer, SampleCallback};
use crate::error::{Error, Result};
use crate::platform::{NativeTracer, Tracer};
use crate::process::{ProcessInfo, ThreadState};
use crate::symbols::SymbolResolver;
use crate::unwind::{MAX_FRAMES, unwind};
use runscope_trace::{Clock, Engine, ProfileEntry};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_SAMPLE_RATE: u32 = 100;
pub const MAX_SAMPLE_RATE: u32 = 1000;

/// Nominal span of a sampled thread entry
const SAMPLE_WIDTH_NS: i64 = 1_000_000;
/// Nominal span of each frame below it
const FRAME_WIDTH_NS: i64 = 800_000;
/// Upper bound on one uninterrupted sleep between ticks
const SLEEP_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStatus {
    Detached,
    Attaching,
    Attached,
    Failed,
}

impl fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttachmentStatus::Detached => "detached",
            AttachmentStatus::Attaching => "attaching",
            AttachmentStatus::Attached => "attached",
            AttachmentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct State {
    status: AttachmentStatus,
    last_error: Option<String>,
    target_name: String,
}

/// Everything the sampling thread shares with the attacher handle
struct Shared<T> {
    pid: u32,
    tracer: Mutex<T>,
    resolver: Mutex<SymbolResolver>,
    state: Mutex<State>,
    samples: Mutex<SampleBuffer>,
    sampling: AtomicBool,
    rate: AtomicU32,
    ticks: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Attaches to one target process and samples its threads' stacks.
///
/// ```no_run
/// use runscope::ProcessAttacher;
///
/// let mut attacher = ProcessAttacher::new(4242);
/// attacher.attach()?;
/// attacher.set_sample_rate(50)?;
/// attacher.start_sampling()?;
/// std::thread::sleep(std::time::Duration::from_secs(1));
/// attacher.stop_sampling();
/// for sample in attacher.sampled_entries() {
///     println!("{} ({} frames)", sample.name, sample.child_count());
/// }
/// attacher.detach()?;
/// # Ok::<(), runscope::Error>(())
/// ```
///
/// Dropping the attacher stops sampling and detaches.
pub struct ProcessAttacher<T: Tracer = NativeTracer> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl ProcessAttacher<NativeTracer> {
    /// An attacher for `pid` using this OS's tracing facility. Nothing is
    /// touched until [`attach`](Self::attach).
    pub fn new(pid: u32) -> Self {
        Self::with_tracer(pid, NativeTracer::new())
    }
}

impl<T: Tracer> ProcessAttacher<T> {
    pub fn with_tracer(pid: u32, tracer: T) -> Self {
        ProcessAttacher {
            shared: Arc::new(Shared {
                pid,
                tracer: Mutex::new(tracer),
                resolver: Mutex::new(SymbolResolver::new()),
                state: Mutex::new(State {
                    status: AttachmentStatus::Detached,
                    last_error: None,
                    target_name: format!("pid-{}", pid),
                }),
                samples: Mutex::new(SampleBuffer::new()),
                sampling: AtomicBool::new(false),
                rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
                ticks: AtomicU64::new(0),
            }),
            worker: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn status(&self) -> AttachmentStatus {
        lock(&self.shared.state).status
    }

    pub fn is_attached(&self) -> bool {
        self.status() == AttachmentStatus::Attached
    }

    /// Human-readable description of the last failure, if any
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.state).last_error.clone()
    }

    /// Executable name of the target, as used in sample names
    pub fn target_name(&self) -> String {
        lock(&self.shared.state).target_name.clone()
    }

    pub fn attach(&mut self) -> Result<()> {
        let pid = self.shared.pid;
        // A sampler may still be running against a target that exited.
        if self.status() == AttachmentStatus::Failed {
            self.stop_sampling();
        }
        {
            let mut state = lock(&self.shared.state);
            match state.status {
                AttachmentStatus::Attached | AttachmentStatus::Attaching => {
                    return Err(Error::AlreadyAttached(pid));
                }
                AttachmentStatus::Detached | AttachmentStatus::Failed => {}
            }
            state.status = AttachmentStatus::Attaching;
            state.last_error = None;
        }

        log::info!("attaching to PID {}", pid);
        let result = {
            let mut tracer = lock(&self.shared.tracer);
            // A target that died under us may still hold tracer state.
            if let Err(e) = tracer.detach() {
                log::debug!("stale tracer state for PID {}: {}", pid, e);
            }
            tracer.attach(pid)
        };

        match result {
            Ok(()) => {
                let target_name = ProcessInfo::new(pid)
                    .map(|p| p.exe_name())
                    .unwrap_or_else(|_| format!("pid-{}", pid));
                *lock(&self.shared.resolver) = SymbolResolver::for_process(pid);

                let mut state = lock(&self.shared.state);
                state.status = AttachmentStatus::Attached;
                state.target_name = target_name;
                log::info!("attached to PID {} ({})", pid, state.target_name);
                Ok(())
            }
            Err(e) => {
                log::warn!("attach to PID {} failed: {}", pid, e);
                let mut state = lock(&self.shared.state);
                state.status = AttachmentStatus::Failed;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Release the target. Stops sampling first; a no-op when detached.
    pub fn detach(&mut self) -> Result<()> {
        if self.status() == AttachmentStatus::Detached {
            return Ok(());
        }
        self.stop_sampling();

        let result = lock(&self.shared.tracer).detach();
        let mut state = lock(&self.shared.state);
        state.status = AttachmentStatus::Detached;
        match result {
            Ok(()) => {
                log::info!("detached from PID {}", self.shared.pid);
                Ok(())
            }
            Err(e) => {
                log::warn!("detach from PID {} failed: {}", self.shared.pid, e);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Spawn the sampling thread. A no-op when it is already running.
    pub fn start_sampling(&mut self) -> Result<()> {
        if self.status() != AttachmentStatus::Attached {
            return Err(Error::NotAttached);
        }
        if self.worker.is_some() {
            return Ok(());
        }

        self.shared.sampling.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("runscope-sampler".to_string())
            .spawn(move || shared.run());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.sampling.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Signal the sampling thread and wait for it. Returns within about one
    /// sleep slice plus one tick.
    pub fn stop_sampling(&mut self) {
        self.shared.sampling.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::warn!("sampling thread for PID {} panicked", self.shared.pid);
            }
            log::info!("sampling of PID {} stopped", self.shared.pid);
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.worker.is_some() && self.shared.sampling.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.rate.load(Ordering::Relaxed)
    }

    /// Samples per second, 1 to 1000. Applies from the next tick.
    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        if !(1..=MAX_SAMPLE_RATE).contains(&rate) {
            return Err(Error::InvalidArgument(format!(
                "sample rate must be between 1 and {} Hz, got {}",
                MAX_SAMPLE_RATE, rate
            )));
        }
        self.shared.rate.store(rate, Ordering::Relaxed);
        Ok(())
    }

    /// Copy of the buffered samples, oldest first
    pub fn sampled_entries(&self) -> Vec<ProfileEntry> {
        lock(&self.shared.samples).entries()
    }

    /// Number of completed sampling ticks
    pub fn sample_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn clear_samples(&self) {
        lock(&self.shared.samples).clear();
    }

    /// Deliver each tick's entries to `callback`.
    ///
    /// The callback runs synchronously on the sampling thread, so a slow
    /// callback slows sampling down rather than queueing data.
    pub fn set_sample_callback<F>(&self, callback: F)
    where
        F: Fn(&[ProfileEntry]) + Send + Sync + 'static,
    {
        lock(&self.shared.samples).set_callback(Arc::new(callback));
    }

    pub fn clear_sample_callback(&self) {
        lock(&self.shared.samples).clear_callback();
    }

    /// Record every sampled entry into `engine` as well, replacing any
    /// registered callback.
    pub fn forward_to_engine(&self, engine: Arc<Engine>) {
        let callback: SampleCallback = Arc::new(move |batch: &[ProfileEntry]| {
            engine.record_entries(batch.iter().cloned());
        });
        lock(&self.shared.samples).set_callback(callback);
    }
}

impl<T: Tracer> Drop for ProcessAttacher<T> {
    fn drop(&mut self) {
        self.stop_sampling();
        if let Err(e) = self.detach() {
            log::warn!("detach on drop failed: {}", e);
        }
    }
}

impl<T: Tracer> fmt::Debug for ProcessAttacher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessAttacher")
            .field("pid", &self.shared.pid)
            .field("status", &self.status())
            .field("sampling", &self.is_sampling())
            .field("rate", &self.sample_rate())
            .finish()
    }
}

impl<T: Tracer> Shared<T> {
    fn run(&self) {
        log::info!(
            "sampling PID {} at {} Hz",
            self.pid,
            self.rate.load(Ordering::Relaxed)
        );

        while self.sampling.load(Ordering::Acquire) {
            let tick_start = Instant::now();

            let batch = self.sample_tick();
            self.ticks.fetch_add(1, Ordering::Relaxed);
            log::debug!("tick sampled {} entries from PID {}", batch.len(), self.pid);
            self.deliver(&batch);

            let rate = u64::from(self.rate.load(Ordering::Relaxed).max(1));
            let interval = Duration::from_millis(1000 / rate);
            self.sleep(interval.saturating_sub(tick_start.elapsed()));
        }
    }

    fn sleep(&self, mut remaining: Duration) {
        while !remaining.is_zero() && self.sampling.load(Ordering::Acquire) {
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    fn sample_tick(&self) -> Vec<ProfileEntry> {
        let now = Clock::now_nanoseconds();
        let target_name = lock(&self.state).target_name.clone();

        let mut tracer = lock(&self.tracer);
        let alive = tracer.is_alive();
        let threads = if alive {
            tracer.enumerate_threads().unwrap_or_else(|e| {
                log::debug!("cannot enumerate threads of PID {}: {}", self.pid, e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        if threads.is_empty() {
            drop(tracer);
            if !alive {
                self.mark_exited();
            }
            let placeholder = ProfileEntry::new(
                format!("[Attached to: {} (PID:{})]", target_name, self.pid),
                now,
                now + SAMPLE_WIDTH_NS,
            )
            .with_thread(u64::from(self.pid));
            return vec![placeholder];
        }

        let mut resolver = lock(&self.resolver);
        threads
            .into_iter()
            .map(|tid| sample_thread(&mut *tracer, &mut resolver, &target_name, tid, now))
            .collect()
    }

    fn mark_exited(&self) {
        let mut state = lock(&self.state);
        if state.status == AttachmentStatus::Attached {
            log::warn!("target process {} exited", self.pid);
            state.status = AttachmentStatus::Failed;
            state.last_error = Some(format!("target process {} exited", self.pid));
        }
    }

    fn deliver(&self, batch: &[ProfileEntry]) {
        let callback = {
            let mut samples = lock(&self.samples);
            samples.push_batch(batch);
            samples.callback()
        };

        if let Some(callback) = callback
            && panic::catch_unwind(AssertUnwindSafe(|| callback(batch))).is_err()
        {
            log::warn!("sample callback panicked");
        }
    }
}

/// One root entry for `tid`, its unwound frames as children.
fn sample_thread<T: Tracer>(
    tracer: &mut T,
    resolver: &mut SymbolResolver,
    target_name: &str,
    tid: u32,
    now: i64,
) -> ProfileEntry {
    let status = tracer.thread_state(tid);
    let mut root = ProfileEntry::new(
        format!(
            "{}::{} [TID:{}, State:{}]",
            target_name, status.name, tid, status.state
        ),
        now,
        now + SAMPLE_WIDTH_NS,
    )
    .with_thread(u64::from(tid));

    // An exited thread never stops for a register read.
    if status.state == ThreadState::Zombie {
        return root;
    }

    match tracer.read_registers(tid) {
        Ok(regs) => {
            let frames = unwind(&*tracer, regs, MAX_FRAMES);
            log::trace!("thread {}: {} frames", tid, frames.len());
            for (depth, addr) in (1u32..).zip(frames) {
                root.push_child(
                    ProfileEntry::new(resolver.resolve(addr), now, now + FRAME_WIDTH_NS)
                        .with_thread(u64::from(tid))
                        .with_depth(depth),
                );
            }
        }
        Err(e) => log::debug!("no registers for thread {}: {}", tid, e),
    }

    root
}
