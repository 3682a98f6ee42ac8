//! Child processes whose output goes to a deployment log

use std::borrow::Cow;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::deploy::log::DeploymentLog;
use crate::errors::ConsoleError;

const REDACTED: &[u8] = b"***";

/// Replaces secrets with `***` in anything written to a log
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<Vec<u8>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret; empty strings are ignored
    pub fn with_secret(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            self.secrets.push(secret.as_bytes().to_vec());
        }
        self
    }

    pub fn apply<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let mut out = Cow::Borrowed(bytes);
        for secret in &self.secrets {
            if let Some(replaced) = replace_all(&out, secret, REDACTED) {
                out = Cow::Owned(replaced);
            }
        }
        out
    }

    pub fn apply_str(&self, text: &str) -> String {
        String::from_utf8_lossy(&self.apply(text.as_bytes())).into_owned()
    }

    /// Length of the longest suffix of `bytes` that starts some secret
    fn partial_tail(&self, bytes: &[u8]) -> usize {
        self.secrets
            .iter()
            .filter_map(|secret| {
                (1..secret.len())
                    .rev()
                    .find(|&k| k <= bytes.len() && bytes.ends_with(&secret[..k]))
            })
            .max()
            .unwrap_or(0)
    }
}

/// Redacts a byte stream that arrives in arbitrary chunks. A tail that could
/// be the start of a secret is held back until the next chunk decides it.
#[derive(Debug)]
pub struct RedactingStream<'a> {
    redactor: &'a Redactor,
    pending: Vec<u8>,
}

impl<'a> RedactingStream<'a> {
    pub fn new(redactor: &'a Redactor) -> Self {
        Self {
            redactor,
            pending: Vec::new(),
        }
    }

    /// Feed a chunk and return the bytes that are safe to emit
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let mut redacted = self.redactor.apply(&self.pending).into_owned();
        let held = self.redactor.partial_tail(&redacted);
        self.pending = redacted.split_off(redacted.len() - held);
        redacted
    }

    /// Everything still held back once the stream has ended
    pub fn finish(self) -> Vec<u8> {
        self.pending
    }
}

fn replace_all(haystack: &[u8], needle: &[u8], with: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut found = false;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(&haystack[start..i]);
            out.extend_from_slice(with);
            i += needle.len();
            start = i;
            found = true;
        } else {
            i += 1;
        }
    }
    if !found {
        return None;
    }
    out.extend_from_slice(&haystack[start..]);
    Some(out)
}

/// Render a command line for the log, with secrets redacted
pub fn display_command(program: &str, args: &[String], redactor: &Redactor) -> String {
    let mut line = String::from("$ ");
    line.push_str(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    redactor.apply_str(&line)
}

/// Child exit status as a shell-style code; signal deaths become `128 + signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Spawn `command`, copy stdout and stderr into `log` as the bytes arrive, and
/// return the exit code. The child is killed if this future is dropped.
pub async fn run_logged(
    mut command: Command,
    log: &DeploymentLog,
    redactor: &Redactor,
) -> Result<i32, ConsoleError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ConsoleError::Internal("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ConsoleError::Internal("child stderr not captured".to_string()))?;

    let (out, err) = tokio::join!(
        pump(stdout, log, redactor),
        pump(stderr, log, redactor)
    );
    out?;
    err?;

    let status = child.wait().await?;
    Ok(exit_code(status))
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    log: &DeploymentLog,
    redactor: &Redactor,
) -> Result<(), ConsoleError> {
    let mut buf = vec![0u8; 8 * 1024];
    let mut stream = RedactingStream::new(redactor);
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return log.append(&stream.finish()).await;
        }
        log.append(&stream.push(&buf[..n])).await?;
    }
}
