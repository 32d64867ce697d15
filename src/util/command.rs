//! Execution of external tools with captured output and an optional deadline.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a successfully finished command.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
/// Errors on executing an external command.
pub enum CommandError {
    /// The command could not be started at all.
    #[display("Unable to start {program}: {source}")]
    Spawn { program: String, source: io::Error },
    /// Waiting on the command failed.
    #[display("Unable to wait on {program}: {source}")]
    Wait { program: String, source: io::Error },
    /// The command ran longer than allowed and was killed.
    #[display("{program} did not finish within {}", humantime::format_duration(*timeout))]
    TimedOut { program: String, timeout: Duration },
    /// The command exited unsuccessfully.
    #[display("{program} failed ({status})")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl CommandError {
    /// Error output of a command which exited unsuccessfully.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}

/// Runs `command` to completion, capturing stdout and stderr separately.
///
/// With a `timeout` the child is killed once the deadline passes.
/// Stdin is always closed so tools can't block on a password prompt.
pub fn run(command: &mut Command, timeout: Option<Duration>) -> Result<Output, CommandError> {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;
    log::trace!(target: "command", "Started {program} (pid {})", child.id());

    // drain both pipes concurrently, a full pipe would stall the child
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match wait(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::TimedOut {
                program,
                timeout: timeout.unwrap_or_default(),
            });
        }
        Err(source) => return Err(CommandError::Wait { program, source }),
    };

    let stdout = collect(stdout);
    let stderr = collect(stderr);

    if !status.success() {
        return Err(CommandError::Failed {
            program,
            status,
            stderr: stderr.trim_end().to_string(),
        });
    }

    Ok(Output { stdout, stderr })
}

/// Renders program and arguments for logging.
///
/// Unlike the [Debug] output of [Command] the environment is left out,
/// it may carry credentials.
pub fn describe(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Waits for the child; `None` if the deadline passed first.
fn wait(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}
