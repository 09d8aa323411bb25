use crate::command::{pump_stdin, PipedChild};
use crate::config::{CommandConfig, SynthesisConfig};
use crate::engine::{SynthesisEngine, SynthesisRequest, SynthesisRequests, SynthesisStream};
use crate::error::VoiceError;
use std::io::Read;
use std::process::ChildStdout;

/// Size of each read from the synthesizer's stdout.
const AUDIO_READ_BYTES: usize = 8 * 1024;

/// Streaming synthesizer backed by an external program such as
/// `piper --output_raw`.
///
/// `{voice}` and `{language}` in the configured arguments are replaced with
/// the values from the stream's configuration request. Text is written to
/// stdin as it arrives and raw audio is read back from stdout.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    command: CommandConfig,
}

impl CommandSynthesizer {
    pub fn new(command: CommandConfig) -> Self {
        Self { command }
    }

    fn render_args(&self, config: &SynthesisConfig) -> Vec<String> {
        self.command
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", &config.voice)
                    .replace("{language}", &config.language_code)
            })
            .collect()
    }
}

impl SynthesisEngine for CommandSynthesizer {
    fn streaming_synthesize(
        &self,
        mut requests: SynthesisRequests,
    ) -> Result<SynthesisStream, VoiceError> {
        let config = match requests.next() {
            Some(SynthesisRequest::Config(config)) => config,
            _ => {
                return Err(VoiceError::Synthesis(
                    "synthesis stream must begin with a configuration request".to_string(),
                ))
            }
        };

        let args = self.render_args(&config);
        let (child, stdin, stdout) =
            PipedChild::spawn(&self.command, &args, VoiceError::Synthesis)?;

        tracing::info!(voice = %config.voice, language = %config.language_code, "streaming synthesis started");

        let text = requests.filter_map(|request| match request {
            SynthesisRequest::Text(text) => Some(text.into_bytes()),
            SynthesisRequest::Config(_) => None,
        });
        pump_stdin("tts-text-writer", stdin, text)?;

        Ok(Box::new(SynthesizerOutput {
            child,
            stdout,
            done: false,
        }))
    }
}

struct SynthesizerOutput {
    child: PipedChild,
    stdout: ChildStdout,
    done: bool,
}

impl Iterator for SynthesizerOutput {
    type Item = Result<Vec<u8>, VoiceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; AUDIO_READ_BYTES];
        match self.stdout.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                tracing::info!("streaming synthesis finished");
                self.child.finish().err().map(Err)
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(buf))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
