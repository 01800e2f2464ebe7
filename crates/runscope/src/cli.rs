use crate::attacher::MAX_SAMPLE_RATE;
use clap::{ArgAction, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "runscope")]
#[command(about = "Sample the call stacks of a running process")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach to a process, sample it, print the latest samples
    Attach {
        /// Process ID to sample
        #[arg(long, short = 'p', conflicts_with = "process")]
        pid: Option<u32>,

        /// Process name to sample (pgrep-style matching)
        #[arg(long, short = 'P', conflicts_with = "pid")]
        process: Option<String>,

        /// Samples per second
        #[arg(long, short = 'r', default_value = "10")]
        rate: u32,

        /// How long to sample (Ctrl-C stops early)
        #[arg(long, short = 'd', default_value = "5s", value_parser = parse_duration)]
        duration: Duration,

        /// Number of most recent samples to print
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,

        /// No progress output while sampling
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// List running processes
    Ps {
        /// Only show processes whose name contains this
        #[arg(long, short = 'f')]
        filter: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    // Try humantime first
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Try bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 500ms, 30s, 5m, 90",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if let Command::Attach {
            pid,
            process,
            rate,
            duration,
            ..
        } = &self.command
        {
            if pid.is_none() && process.is_none() {
                return Err("Either --pid or --process is required".to_string());
            }
            if *rate == 0 || *rate > MAX_SAMPLE_RATE {
                return Err(format!(
                    "Sample rate must be between 1 and {} Hz, got {}",
                    MAX_SAMPLE_RATE, rate
                ));
            }
            if duration.is_zero() {
                return Err("Duration must be greater than zero".to_string());
            }
        }
        Ok(())
    }

    /// Default `env_logger` filter for the verbosity flag
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_attach_defaults() {
        let cli = Cli::try_parse_from(["runscope", "attach", "--pid", "42"]).unwrap();
        assert!(cli.validate().is_ok());
        let Command::Attach {
            pid,
            rate,
            duration,
            limit,
            quiet,
            ..
        } = cli.command
        else {
            panic!("expected attach");
        };
        assert_eq!(pid, Some(42));
        assert_eq!(rate, 10);
        assert_eq!(duration, Duration::from_secs(5));
        assert_eq!(limit, 10);
        assert!(!quiet);
    }

    #[test]
    fn test_attach_requires_target() {
        let cli = Cli::try_parse_from(["runscope", "attach"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_pid_and_process_conflict() {
        let parsed = Cli::try_parse_from(["runscope", "attach", "-p", "1", "-P", "app"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_rate_bounds() {
        let cli = Cli::try_parse_from(["runscope", "attach", "-p", "1", "--rate", "0"]).unwrap();
        assert!(cli.validate().is_err());
        let cli = Cli::try_parse_from(["runscope", "attach", "-p", "1", "-r", "1001"]).unwrap();
        assert!(cli.validate().is_err());
        let cli = Cli::try_parse_from(["runscope", "attach", "-p", "1", "-r", "1000"]).unwrap();
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["runscope", "ps"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
        let cli = Cli::try_parse_from(["runscope", "-vv", "ps", "-f", "sh"]).unwrap();
        assert_eq!(cli.log_filter(), "debug");
    }
}
