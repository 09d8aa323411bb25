//! Child processes streamed over piped stdio.
//!
//! Used by the command-backed engines. Input is written to the child's stdin
//! from a dedicated thread so that the engine's iterator can read stdout on
//! the worker thread at the same time.

use crate::config::CommandConfig;
use crate::error::VoiceError;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

pub(crate) struct PipedChild {
    program: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    error: fn(String) -> VoiceError,
}

impl PipedChild {
    /// Spawns `command.program` with `args`, returning the child together
    /// with its stdin and stdout. `error` selects the error variant used for
    /// this engine.
    pub(crate) fn spawn(
        command: &CommandConfig,
        args: &[String],
        error: fn(String) -> VoiceError,
    ) -> Result<(Self, ChildStdin, ChildStdout), VoiceError> {
        let mut child = Command::new(&command.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| error(format!("failed to spawn {}: {}", command.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| error("failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| error("failed to open stdout".to_string()))?;

        // Drained concurrently so a chatty child cannot block on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).trim().to_string()
            })
        });

        tracing::debug!(program = %command.program, pid = child.id(), "spawned engine process");

        Ok((
            Self {
                program: command.program.clone(),
                child,
                stderr,
                error,
            },
            stdin,
            stdout,
        ))
    }

    /// Waits for the child to exit. A non-zero status becomes an error that
    /// carries whatever the child wrote to stderr.
    pub(crate) fn finish(&mut self) -> Result<(), VoiceError> {
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err((self.error)(format!(
                "{} exited with {}: {}",
                self.program, status, stderr
            )))
        }
    }
}

impl Drop for PipedChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(program = %self.program, "killing engine process");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Writes every chunk of `input` to `stdin` on a new thread, then closes it.
///
/// Stops quietly if the child stops reading.
pub(crate) fn pump_stdin<I>(name: &str, mut stdin: ChildStdin, input: I) -> Result<(), VoiceError>
where
    I: Iterator<Item = Vec<u8>> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut written = 0usize;
            for chunk in input {
                if let Err(e) = stdin.write_all(&chunk).and_then(|()| stdin.flush()) {
                    tracing::debug!(error = %e, written, "engine process stopped reading input");
                    return;
                }
                written += chunk.len();
            }
            tracing::debug!(written, "engine input complete");
        })?;
    Ok(())
}
