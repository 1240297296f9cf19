//! Running POD processes with their output tee'd to a log file.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type SharedLog = Arc<Mutex<BufWriter<File>>>;

/// How a finished child process ended.
#[derive(Debug)]
pub struct CommandOutcome {
    pub status: ExitStatus,
    pub timed_out: bool,
    /// Lines written to the log (stdout and stderr combined).
    pub lines: usize,
}

/// Run `cmd` to completion, writing every stdout/stderr line to `log_path`.
///
/// Both streams are drained concurrently so the child never blocks on a full
/// pipe. With `timeout` set the child is killed once it runs out.
#[instrument(skip_all, fields(log = %log_path.display(), timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_logged(
    mut cmd: Command,
    log_path: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutcome> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = File::create(log_path)
        .with_context(|| format!("create log file {}", log_path.display()))?;
    let log: SharedLog = Arc::new(Mutex::new(BufWriter::new(file)));

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_log = Arc::clone(&log);
    let stderr_log = Arc::clone(&log);
    let stdout_handle = thread::spawn(move || tee_lines(stdout, stdout_log));
    let stderr_handle = thread::spawn(move || tee_lines(stderr, stderr_log));

    let mut timed_out = false;
    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
                timed_out = true;
                child.kill().context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
        None => child.wait().context("wait for command")?,
    };

    let lines = join_lines(stdout_handle).context("join stdout")?
        + join_lines(stderr_handle).context("join stderr")?;

    if let Ok(mut writer) = log.lock()
        && let Err(e) = writer.flush()
    {
        warn!(err = %e, "failed to flush log file");
    }

    debug!(exit_code = ?status.code(), timed_out, lines, "command finished");
    Ok(CommandOutcome {
        status,
        timed_out,
        lines,
    })
}

fn join_lines(handle: thread::JoinHandle<Result<usize>>) -> Result<usize> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Copy `reader` line by line into the shared log, flushing each line.
fn tee_lines<R: Read>(reader: R, log: SharedLog) -> Result<usize> {
    let mut buf_reader = BufReader::new(reader);
    let mut count = 0usize;
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }
        count += 1;
        if let Ok(mut writer) = log.lock() {
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to log file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush log file");
            }
        }
    }
    Ok(count)
}
