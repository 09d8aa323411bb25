//! Duplex relay between a `/ws/stt` client and its transcription session.
//!
//! Each connection moves through `Connecting → Streaming → Draining → Closed`.
//! While streaming, an inbound loop feeds binary frames into the session and
//! an outbound loop sends result frames back as JSON. Both loops are awaited
//! together; neither cancels the other. Draining and closing run exactly once
//! afterwards, however the loops ended.
//!
//! Once the client is gone, the outbound loop keeps flushing results only
//! until a drain deadline of one join timeout. Draining then waits for the
//! worker for whatever is left of that deadline and abandons it after that.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_types::{AudioChunk, ResultFrame};
use parley_voice::{
    BridgeReceiver, BridgeSender, Popped, QueueError, SessionSettings, TranscriptionEngine,
    TranscriptionSession,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Connecting => "connecting",
            RelayState::Streaming => "streaming",
            RelayState::Draining => "draining",
            RelayState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to receive from client: {0}")]
    Receive(axum::Error),
    #[error("failed to send to client: {0}")]
    Send(axum::Error),
    #[error("failed to encode result frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why the inbound loop stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundEnd {
    /// The client closed the socket or the connection dropped.
    ClientGone,
    /// The transcription session stopped accepting audio.
    SessionEnded,
}

/// Why the outbound loop stopped sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundEnd {
    /// The results sentinel arrived.
    ResultsClosed,
    /// The client left and the drain deadline passed first.
    DeadlinePassed,
}

/// Runs the relay for one upgraded socket until the connection is closed.
pub async fn run(socket: WebSocket, engine: Arc<dyn TranscriptionEngine>, settings: SessionSettings) {
    let mut state = RelayState::Connecting;
    tracing::debug!(%state, "relay started");

    let session = TranscriptionSession::start(engine, &settings);
    let (mut sink, mut stream) = socket.split();
    advance(&mut state, RelayState::Streaming);

    let (drain_by, drain_rx) = watch::channel(None::<Instant>);
    let inbound = async {
        let end = receive_audio(&mut stream, session.audio()).await;
        if !matches!(end, Ok(InboundEnd::SessionEnded)) {
            drain_by.send_replace(Some(Instant::now() + settings.join_timeout()));
        }
        end
    };
    let (inbound, outbound) = tokio::join!(
        inbound,
        send_results(&mut sink, session.results(), settings.poll_interval(), drain_rx),
    );

    let mut client_gone = false;
    match inbound {
        Ok(InboundEnd::ClientGone) => client_gone = true,
        Ok(InboundEnd::SessionEnded) => {}
        Err(e) => {
            tracing::debug!(error = %e, "inbound loop failed");
            client_gone = true;
        }
    }
    match outbound {
        Ok(end) => tracing::debug!(?end, "outbound loop finished"),
        Err(e @ RelayError::Send(_)) => {
            tracing::debug!(error = %e, "outbound loop failed");
            client_gone = true;
        }
        Err(e) => tracing::error!(error = %e, "outbound loop failed"),
    }

    advance(&mut state, RelayState::Draining);
    let deadline = *drain_by.borrow();
    let join_wait = match deadline {
        Some(at) => at.saturating_duration_since(Instant::now()),
        None => settings.join_timeout(),
    };
    let exit = session.finish(join_wait).await;
    tracing::debug!(?exit, "transcription session drained");

    advance(&mut state, RelayState::Closed);
    if !client_gone {
        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
    }
    tracing::info!(client_gone, "transcription socket closed");
}

fn advance(state: &mut RelayState, next: RelayState) {
    tracing::debug!(from = %state, to = %next, "relay state changed");
    *state = next;
}

/// Moves binary frames into the session until the client leaves or the
/// session stops listening. The audio queue is closed on every exit path.
async fn receive_audio(
    stream: &mut SplitStream<WebSocket>,
    audio: &BridgeSender<AudioChunk>,
) -> Result<InboundEnd, RelayError> {
    let outcome = forward_frames(stream, audio).await;
    audio.close_async().await;
    outcome
}

async fn forward_frames(
    stream: &mut SplitStream<WebSocket>,
    audio: &BridgeSender<AudioChunk>,
) -> Result<InboundEnd, RelayError> {
    let mut chunks = 0usize;
    while let Some(message) = stream.next().await {
        match message.map_err(RelayError::Receive)? {
            Message::Binary(bytes) => match audio.push_async(bytes.to_vec()).await {
                Ok(()) => chunks += 1,
                Err(QueueError::Full(waited)) => {
                    tracing::warn!(
                        waited_ms = waited.as_millis() as u64,
                        bytes = bytes.len(),
                        "transcription backlog full; dropping audio chunk"
                    );
                }
                Err(e) => {
                    tracing::debug!(chunks, error = %e, "transcription session no longer accepting audio");
                    return Ok(InboundEnd::SessionEnded);
                }
            },
            Message::Text(_) => tracing::debug!("ignoring text frame on audio socket"),
            Message::Close(_) => {
                tracing::debug!(chunks, "client closed the socket");
                return Ok(InboundEnd::ClientGone);
            }
            // Ping and pong are answered by the socket itself.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    tracing::debug!(chunks, "client stream ended");
    Ok(InboundEnd::ClientGone)
}

/// Sends every result frame to the client until the results sentinel, or
/// until the drain deadline once one has been set.
async fn send_results(
    sink: &mut SplitSink<WebSocket, Message>,
    results: &BridgeReceiver<ResultFrame>,
    poll_interval: Duration,
    drain_by: watch::Receiver<Option<Instant>>,
) -> Result<OutboundEnd, RelayError> {
    let mut sent = 0usize;
    loop {
        let deadline = *drain_by.borrow();
        if deadline.is_some_and(|at| Instant::now() >= at) {
            tracing::debug!(sent, "drain deadline passed; dropping unsent results");
            return Ok(OutboundEnd::DeadlinePassed);
        }
        match results.pop_async(poll_interval).await {
            Popped::Item(frame) => {
                if let ResultFrame::Error { error } = &frame {
                    tracing::warn!(%error, "forwarding transcription error to client");
                }
                let json = serde_json::to_string(&frame)?;
                sink.send(Message::Text(json.into()))
                    .await
                    .map_err(RelayError::Send)?;
                sent += 1;
            }
            Popped::TimedOut => continue,
            Popped::Closed => {
                tracing::debug!(sent, "results stream finished");
                return Ok(OutboundEnd::ResultsClosed);
            }
        }
    }
}
