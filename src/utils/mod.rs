pub mod lock;
pub mod logging;

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::debug;
use which::which;

/// Finds the shell used to run the configured dump and restore commands.
pub fn find_shell_executable() -> Result<PathBuf> {
    which("sh").context(
        "sh executable not found in PATH. Configured backup commands are run through the shell.",
    )
}

/// Runs `command` through the shell, writing its stdout to `stdout_path`.
pub fn run_shell_command_to_file(
    command: &str,
    stdout_path: &Path,
    log_context: &str,
) -> Result<()> {
    let shell = find_shell_executable()?;
    let stdout_file = File::create(stdout_path).with_context(|| {
        format!(
            "Failed to create output file for {}: {}",
            log_context,
            stdout_path.display()
        )
    })?;

    // The command line may carry credentials, so it is never logged
    debug!("Running {} command, output to {}", log_context, stdout_path.display());
    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to execute {} command", log_context))?;

    check_status(&output, log_context)
}

/// Runs `command` through the shell with the contents of `stdin_path` on its stdin.
pub fn run_shell_command_with_stdin(
    command: &str,
    stdin_path: &Path,
    log_context: &str,
) -> Result<()> {
    let shell = find_shell_executable()?;
    let stdin_file = File::open(stdin_path).with_context(|| {
        format!(
            "Failed to open input file for {}: {}",
            log_context,
            stdin_path.display()
        )
    })?;

    debug!("Running {} command, input from {}", log_context, stdin_path.display());
    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::from(stdin_file))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to execute {} command", log_context))?;

    check_status(&output, log_context)
}

fn check_status(output: &Output, log_context: &str) -> Result<()> {
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} command failed with status: {}\nStdout: {}\nStderr: {}",
            log_context,
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}
