//! # WebSocket Pitch Stream
//!
//! Serves the pitch stream: clients connect to the configured path on the
//! stream port and send raw PCM; every message is answered with one text
//! message holding the estimated frequency.
//!
//! ## Protocol:
//! 1. **Connection**: WebSocket upgrade on `stream.path` (other paths get 404)
//! 2. **Audio**: each data message is little-endian `f32` mono PCM
//! 3. **Reply**: one text message per data message, e.g. `"215.3"` or `"0.0"`
//! 4. **Close**: a close frame ends the session without a further reply
//!
//! ## Ordering:
//! Each connection is one sequential loop: receive, detect, send. The next
//! message is not read until the previous reply has been written, so a peer
//! is never more than one frame ahead of the detector.
//!
//! ## Shutdown:
//! All loops watch a shared `watch::Receiver<bool>`. Once it flips to `true`
//! a loop waiting for a message sends a `Going Away` close frame and exits;
//! a loop that is mid-frame finishes that reply and exits before reading
//! again. Sessions still open after `stream.shutdown_grace_ms` are aborted.

use crate::config::StreamConfig;
use crate::pitch::{PitchDetector, PitchEstimate, SampleFrame};
use crate::state::AppState;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_tungstenite::tungstenite::{
    handshake::server::{ErrorResponse, Request, Response},
    http::StatusCode,
    protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
    Error as WsError, Message,
};
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Why a stream session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Peer sent a close frame
    PeerClosed,
    /// Transport ended without a close frame
    StreamEnded,
    /// Server shutdown was signalled
    Shutdown,
    /// A message exceeded the configured size cap
    MessageTooBig(String),
    /// Read or write failed
    TransportError(String),
}

/// What one session did, for logs and metrics. Never sent to the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    pub voiced_frames: u64,
    pub reason: CloseReason,
}

/// Drive one connection until it closes or shutdown is signalled.
///
/// `socket` is any WebSocket message stream/sink; in production a
/// `WebSocketStream<TcpStream>`. Every `Binary` or `Text` message is decoded
/// as PCM and answered with exactly one text reply. Control frames are left
/// to tungstenite and get no reply.
pub async fn run<S>(
    mut socket: S,
    detector: &PitchDetector,
    mut shutdown: watch::Receiver<bool>,
) -> SessionSummary
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let mut frames = 0u64;
    let mut voiced_frames = 0u64;

    let reason = loop {
        if *shutdown.borrow() {
            break CloseReason::Shutdown;
        }

        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            message = socket.next() => Some(message),
        };
        let Some(message) = received else {
            break CloseReason::Shutdown;
        };

        let payload = match message {
            None => break CloseReason::StreamEnded,
            Some(Err(WsError::Capacity(err))) => break CloseReason::MessageTooBig(err.to_string()),
            Some(Err(err)) => break CloseReason::TransportError(err.to_string()),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Peer closed stream");
                break CloseReason::PeerClosed;
            }
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
        };

        let frame = SampleFrame::from_le_bytes(&payload);
        let sample_count = frame.len();
        let estimate = estimate_frame(detector, frame);
        frames += 1;
        if !estimate.is_silence() {
            voiced_frames += 1;
        }

        let reply = estimate.to_string();
        debug!(samples = sample_count, pitch = %reply, "Frame estimated");

        if let Err(err) = socket.send(Message::Text(reply)).await {
            break CloseReason::TransportError(err.to_string());
        }
    };

    match reason {
        CloseReason::Shutdown => {
            send_close(&mut socket, CloseCode::Away, "server shutting down").await;
        }
        CloseReason::MessageTooBig(_) => {
            send_close(&mut socket, CloseCode::Size, "message too big").await;
        }
        CloseReason::PeerClosed => {
            // Flushes tungstenite's queued close acknowledgement
            if let Err(err) = socket.close().await {
                debug!(error = %err, "Close handshake not completed");
            }
        }
        CloseReason::StreamEnded | CloseReason::TransportError(_) => {}
    }

    SessionSummary {
        frames,
        voiced_frames,
        reason,
    }
}

async fn send_close<S>(socket: &mut S, code: CloseCode, reason: &'static str)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(err) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %err, "Close frame not delivered");
    }
}

/// A frame shorter than one sample is answered as silence without running
/// detection.
fn estimate_frame(detector: &PitchDetector, frame: SampleFrame) -> PitchEstimate {
    if frame.is_empty() {
        return PitchEstimate::SILENCE;
    }
    detector.detect(frame)
}

/// Accept stream connections until shutdown, then give open sessions
/// `stream.shutdown_grace_ms` to wind down before aborting them.
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown: watch::Receiver<bool>) {
    let grace = Duration::from_millis(state.config().stream.shutdown_grace_ms);
    let mut incoming = TcpListenerStream::new(listener);
    let mut connections = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = finished {
                    warn!(error = %err, "Stream connection task failed");
                }
            }
            accepted = incoming.next() => match accepted {
                Some(Ok(tcp)) => {
                    let peer = tcp.peer_addr().ok();
                    let span = tracing::info_span!(
                        "stream",
                        connection = %Uuid::new_v4(),
                        peer = ?peer
                    );
                    connections.spawn(
                        handle_connection(tcp, state.clone(), shutdown.clone()).instrument(span),
                    );
                }
                Some(Err(err)) => warn!(error = %err, "Failed to accept stream connection"),
                None => break,
            },
        }
    }

    info!(open = connections.len(), "Stream listener stopped, closing open sessions");
    if tokio::time::timeout(grace, drain(&mut connections)).await.is_err() {
        warn!(
            open = connections.len(),
            grace_ms = grace.as_millis() as u64,
            "Stream sessions still open after grace period, aborting"
        );
        connections.abort_all();
        drain(&mut connections).await;
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while let Some(finished) = connections.join_next().await {
        match finished {
            Err(err) if !err.is_cancelled() => warn!(error = %err, "Stream connection task failed"),
            _ => {}
        }
    }
}

async fn handle_connection(tcp: TcpStream, state: AppState, shutdown: watch::Receiver<bool>) {
    let settings = &state.config().stream;
    let expected_path = settings.path.clone();

    let check_path =
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if request.uri().path() == expected_path {
                return Ok(response);
            }
            let mut rejection =
                ErrorResponse::new(Some(format!("No stream endpoint at {}", request.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        };

    let socket = match tokio_tungstenite::accept_hdr_async_with_config(
        tcp,
        check_path,
        Some(socket_config(settings)),
    )
    .await
    {
        Ok(socket) => socket,
        Err(err) => {
            debug!(error = %err, "Stream handshake rejected");
            return;
        }
    };

    state.stream_opened();
    info!("Pitch stream opened");

    let summary = run(socket, &state.detector, shutdown).await;
    state.stream_closed(summary.frames, summary.voiced_frames);

    match &summary.reason {
        CloseReason::TransportError(err) => warn!(
            frames = summary.frames,
            error = %err,
            "Pitch stream terminated by transport error"
        ),
        CloseReason::MessageTooBig(err) => warn!(
            frames = summary.frames,
            error = %err,
            "Pitch stream closed: message over the configured cap"
        ),
        reason => info!(
            frames = summary.frames,
            voiced = summary.voiced_frames,
            reason = ?reason,
            "Pitch stream closed"
        ),
    }
}

/// Applies `max_message_bytes` when set; otherwise tungstenite's defaults.
fn socket_config(settings: &StreamConfig) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    if let Some(limit) = settings.max_message_bytes {
        config.max_message_size = Some(limit);
        config.max_frame_size = Some(limit);
    }
    config
}
