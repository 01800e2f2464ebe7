use crate::error::Result;
use crate::process::{ProcessInfo, enumerate_processes};

pub fn run(filter: Option<&str>) -> Result<()> {
    let processes: Vec<ProcessInfo> = enumerate_processes()?
        .into_iter()
        .filter(|p| filter.is_none_or(|f| p.name().contains(f)))
        .collect();

    if processes.is_empty() {
        match filter {
            Some(f) => println!("No processes matching '{}'", f),
            None => println!("No processes found"),
        }
        return Ok(());
    }

    println!("{:>8}  {:<20}  EXE", "PID", "NAME");
    println!("{}", "-".repeat(72));

    for process in &processes {
        let exe = process
            .exe_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>8}  {:<20}  {}", process.pid(), process.name(), exe);
    }

    Ok(())
}
