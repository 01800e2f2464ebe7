use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Multiple processes match '{pattern}':\n{matches}\nUse --pid to specify exactly one.")]
    MultipleProcesses { pattern: String, matches: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already attached to PID {0}")]
    AlreadyAttached(u32),

    #[error("Not attached to a process")]
    NotAttached,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Trace error: {0}")]
    Trace(String),

    #[error("Tracer thread exited")]
    TracerGone,

    #[error("Symbol resolution error: {0}")]
    SymbolResolution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const PROCESS_NOT_FOUND: i32 = 3;
    pub const PERMISSION_DENIED: i32 = 4;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProcessNotFound(_) | Error::MultipleProcesses { .. } => {
                exit_code::PROCESS_NOT_FOUND
            }
            Error::PermissionDenied(_) => exit_code::PERMISSION_DENIED,
            Error::InvalidArgument(_) => exit_code::INVALID_ARGUMENTS,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}

#[cfg(target_os = "linux")]
impl Error {
    /// Map a failed tracing syscall against `pid` onto the taxonomy.
    pub(crate) fn from_errno(pid: u32, what: &str, errno: nix::errno::Errno) -> Self {
        use nix::errno::Errno;
        match errno {
            Errno::EPERM | Errno::EACCES => Error::PermissionDenied(format!(
                "{what} PID {pid}: {errno}. Try: sudo sysctl -w kernel.yama.ptrace_scope=0"
            )),
            Errno::ESRCH => Error::ProcessNotFound(format!("PID {pid}")),
            _ => Error::Trace(format!("{what} PID {pid}: {errno}")),
        }
    }
}
