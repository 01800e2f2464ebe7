use crate::attacher::{AttachmentStatus, ProcessAttacher};
use crate::error::Result;
use crate::process::ProcessInfo;
use comfy_table::{ContentArrangement, Table, presets};
use runscope_trace::ProfileEntry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the progress line is refreshed
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct AttachOptions {
    pub pid: u32,
    pub rate: u32,
    pub duration: Duration,
    pub limit: usize,
    pub quiet: bool,
}

pub fn run(opts: &AttachOptions) -> Result<()> {
    let proc_info = ProcessInfo::new(opts.pid)?;
    eprintln!(
        "Attaching to {} (PID {})",
        proc_info.name(),
        proc_info.pid()
    );

    let mut attacher = ProcessAttacher::new(opts.pid);
    attacher.set_sample_rate(opts.rate)?;
    attacher.attach()?;
    attacher.start_sampling()?;
    let started_at = chrono::Local::now();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl-C handler not installed: {}", e);
    }

    eprintln!(
        "Sampling at {} Hz for {} (Ctrl-C to stop)...",
        opts.rate,
        humantime::format_duration(opts.duration)
    );

    let start = Instant::now();
    while running.load(Ordering::SeqCst) && start.elapsed() < opts.duration {
        if attacher.status() == AttachmentStatus::Failed {
            if let Some(error) = attacher.last_error() {
                eprintln!("\n{}", error);
            }
            break;
        }
        if !opts.quiet {
            eprint!(
                "\rTicks: {} | Elapsed: {:.1}s",
                attacher.sample_count(),
                start.elapsed().as_secs_f64()
            );
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    attacher.stop_sampling();
    let ticks = attacher.sample_count();
    let samples = attacher.sampled_entries();
    attacher.detach()?;

    if !opts.quiet {
        eprintln!();
    }
    eprintln!("Sampling complete. Ticks: {}, samples kept: {}", ticks, samples.len());

    println!(
        "# {} (PID {}) | Started: {}",
        proc_info.name(),
        proc_info.pid(),
        started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("# Rate: {} Hz | Ticks: {}", opts.rate, ticks);
    println!();
    println!("{}", summary_table(&samples, opts.limit));

    Ok(())
}

/// The `limit` most recent samples, oldest first, with their frames
fn summary_table(samples: &[ProfileEntry], limit: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["T+ms", "THREAD", "FRAMES"]);

    let Some(first) = samples.first() else {
        return table;
    };
    let skip = samples.len().saturating_sub(limit);

    for sample in &samples[skip..] {
        let offset_ms = (sample.start_ns - first.start_ns) as f64 / 1_000_000.0;
        table.add_row(vec![
            format!("{:.1}", offset_ms),
            sample.name.clone(),
            format_frames(sample),
        ]);
    }

    table
}

fn format_frames(sample: &ProfileEntry) -> String {
    if !sample.has_children() {
        return "-".to_string();
    }
    sample
        .children
        .iter()
        .map(|frame| format!("#{} {}", frame.depth.saturating_sub(1), frame.name))
        .collect::<Vec<_>>()
        .join("\n")
}
