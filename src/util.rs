//! Shared utility functions for the autopr crate.

use std::path::{Path, PathBuf};

/// Search PATH for an executable. Returns its absolute path if found.
pub fn which(bin: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(bin);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Walk upward from `start` to the nearest directory containing `.git`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// First line of a possibly multi-line string.
pub fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

/// Spawn a command, stream its stdout and stderr line by line to our own
/// stdout (and to `log` when given), and report whether it exited zero.
///
/// Err means the command could not be started or waited on at all; a
/// non-zero exit is Ok(false).
pub async fn run_streaming(
    mut cmd: tokio::process::Command,
    log: Option<&Path>,
) -> anyhow::Result<bool> {
    use anyhow::Context;
    use tokio::io::{AsyncBufReadExt, BufReader};

    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    let mut child = cmd.spawn().context("Failed to spawn command")?;

    let stdout = child.stdout.take().context("Child stdout not captured")?;
    let stderr = child.stderr.take().context("Child stderr not captured")?;

    let log_path = log.map(Path::to_path_buf);
    let append = move |line: &str| {
        println!("{line}");
        if let Some(path) = &log_path {
            let entry = format!("{line}\n");
            if let Ok(mut f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                use std::io::Write;
                let _ = f.write_all(entry.as_bytes());
            }
        }
    };

    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;
    while out_open || err_open {
        tokio::select! {
            line = out_lines.next_line(), if out_open => match line {
                Ok(Some(line)) => append(&line),
                _ => out_open = false,
            },
            line = err_lines.next_line(), if err_open => match line {
                Ok(Some(line)) => append(&line),
                _ => err_open = false,
            },
        }
    }

    let status = child.wait().await.context("Failed to wait for command")?;
    Ok(status.success())
}
