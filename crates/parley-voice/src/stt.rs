use crate::command::{pump_stdin, PipedChild};
use crate::config::CommandConfig;
use crate::engine::{AudioInput, RecognitionResponse, RecognitionStream, TranscriptionEngine};
use crate::error::VoiceError;
use std::io::{BufRead, BufReader, Lines};
use std::process::ChildStdout;

/// Streaming recognizer backed by an external program.
///
/// Audio chunks are written to the program's stdin as they arrive. The
/// program is expected to print one JSON object per line on stdout, shaped
/// like `{"results": [{"is_final": ..., "stability": ..., "alternatives": [...]}]}`.
/// Closing stdin tells it the audio is over.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    command: CommandConfig,
}

impl CommandRecognizer {
    pub fn new(command: CommandConfig) -> Self {
        Self { command }
    }
}

impl TranscriptionEngine for CommandRecognizer {
    fn streaming_recognize(&self, audio: AudioInput) -> Result<RecognitionStream, VoiceError> {
        let (child, stdin, stdout) =
            PipedChild::spawn(&self.command, &self.command.args, VoiceError::Transcription)?;
        pump_stdin("stt-audio-writer", stdin, audio)?;

        Ok(Box::new(RecognizerOutput {
            child,
            lines: BufReader::new(stdout).lines(),
            done: false,
        }))
    }
}

struct RecognizerOutput {
    child: PipedChild,
    lines: Lines<BufReader<ChildStdout>>,
    done: bool,
}

impl Iterator for RecognizerOutput {
    type Item = Result<RecognitionResponse, VoiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => {
                    return Some(serde_json::from_str(&line).map_err(|e| {
                        VoiceError::Transcription(format!("malformed recognizer output: {}", e))
                    }));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    return self.child.finish().err().map(Err);
                }
            }
        }
    }
}
