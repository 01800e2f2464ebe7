use anyhow::Context;
use clap::Parser;
use runscope::cli::{Cli, Command};
use runscope::commands::attach::AttachOptions;
use runscope::error::exit_code;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(runscope_err) = e.downcast_ref::<runscope::Error>() {
                ExitCode::from(runscope_err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    // Validate CLI arguments
    if let Err(e) = cli.validate() {
        return Err(runscope::Error::InvalidArgument(e)).context("Invalid arguments");
    }

    match cli.command {
        Command::Attach {
            pid,
            process,
            rate,
            duration,
            limit,
            quiet,
        } => {
            let pid = match (pid, process) {
                (Some(pid), _) => pid,
                (None, Some(name)) => runscope::process::find_process_by_name(&name)?,
                (None, None) => unreachable!("validated in cli"),
            };
            let opts = AttachOptions {
                pid,
                rate,
                duration,
                limit,
                quiet,
            };
            runscope::commands::attach::run(&opts)
                .with_context(|| format!("Sampling PID {} failed", pid))?;
        }
        Command::Ps { filter } => {
            runscope::commands::ps::run(filter.as_deref())?;
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "runscope", &mut std::io::stdout());
        }
    }

    Ok(())
}
