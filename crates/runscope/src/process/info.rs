use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Information about a target process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pid: u32,
    name: String,
    exe_path: Option<PathBuf>,
}

impl ProcessInfo {
    /// Create ProcessInfo for a given PID
    #[cfg(target_os = "linux")]
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);

        if !Path::new(&proc_path).exists() {
            return Err(Error::ProcessNotFound(format!("PID {}", pid)));
        }

        let name = fs::read_to_string(format!("{}/comm", proc_path))
            .map_err(|_| Error::ProcessNotFound(format!("Cannot read comm for PID {}", pid)))?
            .trim()
            .to_string();

        // Unreadable for other users' processes; the name is still useful.
        let exe_path = fs::read_link(format!("{}/exe", proc_path)).ok();

        Ok(ProcessInfo {
            pid,
            name,
            exe_path,
        })
    }

    #[cfg(target_os = "macos")]
    pub fn new(pid: u32) -> Result<Self> {
        if !is_process_running(pid) {
            return Err(Error::ProcessNotFound(format!("PID {}", pid)));
        }
        let exe_path = darwin::pid_path(pid);
        let name = exe_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("pid-{pid}"));
        Ok(ProcessInfo {
            pid,
            name,
            exe_path,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub fn new(pid: u32) -> Result<Self> {
        Err(Error::UnsupportedPlatform(format!(
            "cannot inspect PID {pid} on this platform"
        )))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exe_path(&self) -> Option<&Path> {
        self.exe_path.as_deref()
    }

    /// Executable file name, falling back to the short process name.
    pub fn exe_name(&self) -> String {
        self.exe_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Get all thread IDs for this process
    #[cfg(target_os = "linux")]
    pub fn thread_ids(&self) -> Result<Vec<u32>> {
        thread_ids(self.pid)
    }
}

/// Get all thread IDs of `pid` from /proc/[pid]/task
#[cfg(target_os = "linux")]
pub fn thread_ids(pid: u32) -> Result<Vec<u32>> {
    let task_path = format!("/proc/{}/task", pid);
    let mut tids = Vec::new();

    for entry in fs::read_dir(&task_path)
        .map_err(|e| Error::ProcessNotFound(format!("Cannot read tasks for PID {}: {}", pid, e)))?
        .flatten()
    {
        if let Some(tid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) {
            tids.push(tid);
        }
    }

    tids.sort_unstable();
    Ok(tids)
}

/// Scheduler state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    Unknown,
}

impl ThreadState {
    /// Map the state letter of /proc/[pid]/task/[tid]/stat
    pub fn from_proc_code(code: char) -> Self {
        match code {
            'R' => ThreadState::Running,
            'S' => ThreadState::Sleeping,
            'D' => ThreadState::DiskSleep,
            'Z' => ThreadState::Zombie,
            'T' | 't' => ThreadState::Stopped,
            _ => ThreadState::Unknown,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreadState::Running => "Running",
            ThreadState::Sleeping => "Sleeping",
            ThreadState::DiskSleep => "Disk_Sleep",
            ThreadState::Zombie => "Zombie",
            ThreadState::Stopped => "Stopped",
            ThreadState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Best-effort name and state of one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStatus {
    pub name: String,
    pub state: ThreadState,
}

impl ThreadStatus {
    pub fn unknown(tid: u32) -> Self {
        ThreadStatus {
            name: format!("Thread-{tid}"),
            state: ThreadState::Unknown,
        }
    }
}

/// Parse the `comm` and state fields of a /proc stat line.
///
/// `comm` may itself contain spaces and parentheses, so it runs from the
/// first '(' to the last ')'.
pub fn parse_stat_line(line: &str) -> Option<ThreadStatus> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close <= open {
        return None;
    }
    let name = line[open + 1..close].to_string();
    let state = line[close + 1..]
        .trim_start()
        .chars()
        .next()
        .map(ThreadState::from_proc_code)
        .unwrap_or(ThreadState::Unknown);
    Some(ThreadStatus { name, state })
}

/// Read /proc/[pid]/task/[tid]/stat
#[cfg(target_os = "linux")]
pub fn read_thread_status(pid: u32, tid: u32) -> ThreadStatus {
    fs::read_to_string(format!("/proc/{}/task/{}/stat", pid, tid))
        .ok()
        .and_then(|line| parse_stat_line(&line))
        .unwrap_or_else(|| ThreadStatus::unknown(tid))
}

/// Whether any thread of `pid` is still alive. A process whose leader
/// called `pthread_exit` keeps running on its other threads.
#[cfg(target_os = "linux")]
pub fn has_live_threads(pid: u32) -> bool {
    thread_ids(pid).is_ok_and(|tids| {
        tids.into_iter()
            .any(|tid| read_thread_status(pid, tid).state != ThreadState::Zombie)
    })
}

/// Check whether a process with this PID exists
pub fn is_process_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Signal 0 probes for existence; EPERM still means it exists.
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            return false;
        };
        let ret = unsafe { libc::kill(raw, 0) };
        ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

/// List every process visible to us
#[cfg(target_os = "linux")]
pub fn enumerate_processes() -> Result<Vec<ProcessInfo>> {
    let mut processes = Vec::new();
    for entry in fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Processes may exit between readdir and the reads below.
        if let Ok(info) = ProcessInfo::new(pid) {
            processes.push(info);
        }
    }
    processes.sort_by_key(ProcessInfo::pid);
    Ok(processes)
}

#[cfg(target_os = "macos")]
pub fn enumerate_processes() -> Result<Vec<ProcessInfo>> {
    let mut processes: Vec<ProcessInfo> = darwin::all_pids()?
        .into_iter()
        .filter_map(|pid| ProcessInfo::new(pid).ok())
        .collect();
    processes.sort_by_key(ProcessInfo::pid);
    Ok(processes)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn enumerate_processes() -> Result<Vec<ProcessInfo>> {
    Err(Error::UnsupportedPlatform(
        "process listing is not available on this platform".to_string(),
    ))
}

/// Find a process by name (pgrep-style matching)
pub fn find_process_by_name(pattern: &str) -> Result<u32> {
    let own_pid = std::process::id();
    let matches: Vec<(u32, String)> = enumerate_processes()?
        .into_iter()
        .filter(|p| p.pid() != own_pid && p.name().contains(pattern))
        .map(|p| (p.pid(), p.name().to_string()))
        .collect();

    match matches.len() {
        0 => Err(Error::ProcessNotFound(format!(
            "No process matching '{}'",
            pattern
        ))),
        1 => Ok(matches[0].0),
        _ => {
            let match_list = matches
                .iter()
                .map(|(pid, name)| format!("  PID {}: {}", pid, name))
                .collect::<Vec<_>>()
                .join("\n");
            Err(Error::MultipleProcesses {
                pattern: pattern.to_string(),
                matches: match_list,
            })
        }
    }
}

#[cfg(target_os = "macos")]
mod darwin {
    use crate::error::{Error, Result};
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    use std::path::PathBuf;

    pub(super) fn pid_path(pid: u32) -> Option<PathBuf> {
        let mut buf = vec![0u8; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
        let len = unsafe {
            libc::proc_pidpath(pid as libc::c_int, buf.as_mut_ptr().cast(), buf.len() as u32)
        };
        if len <= 0 {
            return None;
        }
        buf.truncate(len as usize);
        Some(PathBuf::from(OsStr::from_bytes(&buf)))
    }

    pub(super) fn all_pids() -> Result<Vec<u32>> {
        let count = unsafe { libc::proc_listallpids(std::ptr::null_mut(), 0) };
        if count <= 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        // Leave headroom for processes started between the two calls.
        let mut pids = vec![0 as libc::pid_t; count as usize + 32];
        let bytes = (pids.len() * std::mem::size_of::<libc::pid_t>()) as libc::c_int;
        let filled = unsafe { libc::proc_listallpids(pids.as_mut_ptr().cast(), bytes) };
        if filled <= 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        pids.truncate(filled as usize);
        Ok(pids.into_iter().filter(|&p| p > 0).map(|p| p as u32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_line() {
        let status = parse_stat_line("1234 (worker) S 1 1234 1234 0 -1").unwrap();
        assert_eq!(status.name, "worker");
        assert_eq!(status.state, ThreadState::Sleeping);
    }

    #[test]
    fn test_parse_stat_line_with_parens_in_name() {
        let status = parse_stat_line("77 (tokio (rt) 1) R 1 77").unwrap();
        assert_eq!(status.name, "tokio (rt) 1");
        assert_eq!(status.state, ThreadState::Running);
    }

    #[test]
    fn test_parse_stat_line_rejects_garbage() {
        assert!(parse_stat_line("").is_none());
        assert!(parse_stat_line("12 ) oops (").is_none());
        let truncated = parse_stat_line("12 (name)").unwrap();
        assert_eq!(truncated.state, ThreadState::Unknown);
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(ThreadState::from_proc_code('D'), ThreadState::DiskSleep);
        assert_eq!(ThreadState::from_proc_code('Z'), ThreadState::Zombie);
        assert_eq!(ThreadState::from_proc_code('t'), ThreadState::Stopped);
        assert_eq!(ThreadState::from_proc_code('I'), ThreadState::Unknown);
        assert_eq!(ThreadState::DiskSleep.to_string(), "Disk_Sleep");
    }

    #[test]
    fn test_pid_zero_is_not_running() {
        assert!(!is_process_running(0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_process_info() {
        let pid = std::process::id();
        assert!(is_process_running(pid));

        let info = ProcessInfo::new(pid).unwrap();
        assert_eq!(info.pid(), pid);
        assert!(!info.name().is_empty());
        assert!(info.exe_path().is_some());

        let tids = info.thread_ids().unwrap();
        assert!(tids.contains(&pid));

        let status = read_thread_status(pid, pid);
        assert_ne!(status.state, ThreadState::Zombie);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_threads() {
        assert!(has_live_threads(std::process::id()));
        assert!(!has_live_threads(u32::MAX - 1));

        // An unreaped child is a process of zombies only.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while read_thread_status(pid, pid).state != ThreadState::Zombie {
            assert!(std::time::Instant::now() < deadline, "child never exited");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(is_process_running(pid));
        assert!(!has_live_threads(pid));
        child.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_process() {
        // PIDs are capped well below u32::MAX on Linux.
        let err = ProcessInfo::new(u32::MAX - 1).unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(_)));
    }
}
