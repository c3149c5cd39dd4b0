//! Colored CLI display utilities for script output.
//!
//! This module provides the terminal sinks used by the binary when it
//! supervises a script in the foreground.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::process::ProcessState;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Short tag describing a terminal process state.
#[must_use]
pub fn state_tag(state: ProcessState) -> &'static str {
    match state {
        ProcessState::NotStarted => "PENDING",
        ProcessState::Running => "RUNNING",
        ProcessState::Exited { code: Some(0) } => "DONE",
        ProcessState::Exited { .. } => "FAILED",
        ProcessState::Killed => "KILLED",
    }
}

/// Print run start information.
pub fn print_run_start(command: &str, working_dir: &str, pid: Option<u32>) {
    println!(
        "{} {} {} in {} {}",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        command.cyan(),
        working_dir,
        pid.map_or(String::new(), |p| format!("pid={p}")).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a stdout line from the script.
pub fn print_line(line: &str) {
    println!("{} {} {}", timestamp().dimmed(), "[OUT]".green(), line);
    let _ = io::stdout().flush();
}

/// Print a stderr line from the script.
pub fn print_error_line(line: &str) {
    println!("{} {} {}", timestamp().dimmed(), "[ERR]".red(), line);
    let _ = io::stdout().flush();
}

/// Write raw progress output without decoration.
pub fn print_progress(bytes: &[u8]) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(bytes);
    let _ = out.flush();
}

/// Print the final state of the run.
pub fn print_run_end(state: ProcessState) {
    let tag = format!("[{}]", state_tag(state));
    let tag = match state {
        ProcessState::Exited { code: Some(0) } => tag.green().bold().to_string(),
        ProcessState::Killed => tag.yellow().bold().to_string(),
        _ => tag.red().bold().to_string(),
    };
    println!("{} {} Script {}", timestamp().dimmed(), tag, state);
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
