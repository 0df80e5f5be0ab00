//! Session broker watch client.
//!
//! Owns exactly one subscription stream to the remote broker. A single
//! driver task reads the websocket and emits typed [`WatchEvent`]s to one
//! consumer; closing the [`WatchHandle`] is the only cancellation mechanism.
//! Whatever happens, the consumer sees exactly one terminal event
//! ([`WatchEvent::Completed`] for a normal close, [`WatchEvent::Error`] for
//! everything else), after which the event channel closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use gatelink_core::codec;
use gatelink_core::messages::{SessionAnnouncement, SessionRejection, WatchRequest, WatchResponse};
use gatelink_core::{GameProfile, GateError, GateResult};

use crate::config::GateConfig;
use crate::session::SessionContext;

/// Header carrying the endpoint name this server watches as.
pub const ENDPOINT_HEADER: &str = "gatelink-endpoint";
/// Header opting the endpoint into offline-mode players. Sent only when
/// configured.
pub const ENDPOINT_OFFLINE_MODE_HEADER: &str = "gatelink-endpoint-offline-mode";
/// Repeated header naming parent endpoints, order preserved.
pub const ENDPOINT_PARENTS_HEADER: &str = "gatelink-endpoint-parents";

/// Events emitted by the watch driver task.
#[derive(Debug)]
pub enum WatchEvent {
    /// Stream established.
    Opened,
    /// One decoded inbound session announcement.
    Proposal(SessionProposal),
    /// Stream ended with the normal close code. Terminal.
    Completed,
    /// Stream ended abnormally. Terminal.
    Error(GateError),
}

#[derive(Debug)]
enum Command {
    Reject {
        rejection: SessionRejection,
        ack: oneshot::Sender<GateResult<()>>,
    },
    Close,
}

/// One broker announcement awaiting a local accept/reject decision.
///
/// Exactly one decision wins: the first of [`reject`](Self::reject) or
/// [`accept`](Self::accept) marks the proposal decided, the other fails
/// with [`GateError::AlreadyDecided`]. Accepting sends nothing to the
/// broker; building the session is the acceptance.
#[derive(Debug)]
pub struct SessionProposal {
    announcement: SessionAnnouncement,
    decided: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionProposal {
    /// Proposal id, referenced by a rejection.
    pub fn id(&self) -> &str {
        &self.announcement.id
    }

    pub fn profile(&self) -> &GameProfile {
        &self.announcement.profile
    }

    pub fn client_address(&self) -> Option<&str> {
        self.announcement.client_address.as_deref()
    }

    /// Decline this session, optionally with a free-text reason.
    ///
    /// The rejection is sent on the watch stream; the actual send result is
    /// reported back. After the stream has closed this fails with
    /// [`GateError::StreamClosed`] and is never retried. Callable from any
    /// task.
    pub async fn reject(&self, reason: Option<&str>) -> GateResult<()> {
        self.decide()?;
        let rejection = SessionRejection {
            id: self.announcement.id.clone(),
            reason: reason.map(str::to_owned),
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Reject {
                rejection,
                ack: ack_tx,
            })
            .map_err(|_| GateError::StreamClosed)?;
        ack_rx.await.map_err(|_| GateError::StreamClosed)?
    }

    /// Mark the proposal accepted and build its session context.
    pub fn accept(&self) -> GateResult<SessionContext> {
        // validate before burning the decision
        let context = SessionContext::from_announcement(&self.announcement)?;
        self.decide()?;
        Ok(context)
    }

    fn decide(&self) -> GateResult<()> {
        self.decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GateError::AlreadyDecided)?;
        Ok(())
    }

    /// A proposal with no live stream behind it, for exercising the accept
    /// path without a broker.
    #[cfg(test)]
    pub(crate) fn detached(announcement: SessionAnnouncement) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        Self {
            announcement,
            decided: Arc::new(AtomicBool::new(false)),
            commands,
        }
    }
}

/// Handle to a live watch stream; closing it is the only cancellation.
pub struct WatchHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl WatchHandle {
    /// Initiate the close handshake. The driver still delivers its single
    /// terminal event.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Client for the broker's watch protocol.
pub struct WatchClient {
    config: GateConfig,
    token: String,
}

impl WatchClient {
    pub fn new(config: GateConfig, token: String) -> Self {
        Self { config, token }
    }

    /// Open the subscription stream.
    ///
    /// Spawns the driver task (must be called within a tokio runtime) and
    /// returns the stream handle plus the event receiver. Connection
    /// failures surface as the terminal [`WatchEvent::Error`].
    pub fn watch(&self) -> GateResult<(WatchHandle, mpsc::Receiver<WatchEvent>)> {
        let request = build_watch_request(&self.config, &self.token)?;
        let (events_tx, events_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let proposal_commands = command_tx.clone();
        tokio::spawn(async move {
            let terminal = run_stream(request, &events_tx, command_rx, proposal_commands).await;
            let event = match terminal {
                Terminal::Completed => WatchEvent::Completed,
                Terminal::Error(err) => WatchEvent::Error(err),
            };
            if events_tx.send(event).await.is_err() {
                debug!("watch consumer dropped before terminal event");
            }
        });

        Ok((
            WatchHandle {
                commands: command_tx,
            },
            events_rx,
        ))
    }
}

fn build_watch_request(config: &GateConfig, token: &str) -> GateResult<Request> {
    let mut request = config
        .watch_url
        .as_str()
        .into_client_request()
        .map_err(|e| GateError::Transport(format!("invalid watch url: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(ENDPOINT_HEADER, header_value(&config.endpoint)?);
    if let Some(offline) = config.allow_offline_mode_players {
        headers.insert(
            ENDPOINT_OFFLINE_MODE_HEADER,
            header_value(&offline.to_string())?,
        );
    }
    for parent in &config.parents {
        headers.append(ENDPOINT_PARENTS_HEADER, header_value(parent)?);
    }
    headers.insert("authorization", header_value(&format!("Bearer {token}"))?);
    Ok(request)
}

fn header_value(value: &str) -> GateResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| GateError::Protocol(format!("invalid header value: {value}")))
}

enum Terminal {
    Completed,
    Error(GateError),
}

async fn run_stream(
    request: Request,
    events: &mpsc::Sender<WatchEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    proposal_commands: mpsc::UnboundedSender<Command>,
) -> Terminal {
    let (ws, _response) = match tokio_tungstenite::connect_async(request).await {
        Ok(established) => established,
        Err(err) => return Terminal::Error(connect_error(err)),
    };
    debug!("watch stream established");

    let (mut sink, mut stream) = ws.split();
    let mut closing = false;

    if events.send(WatchEvent::Opened).await.is_err() {
        closing = true;
        let _ = sink.send(Message::Close(None)).await;
    }

    // close frame observed from the broker, if any
    let mut close_frame: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            Some(command) = commands.recv() => match command {
                Command::Reject { rejection, ack } => {
                    let result = send_rejection(&mut sink, rejection).await;
                    let _ = ack.send(result);
                }
                Command::Close => {
                    if !closing {
                        closing = true;
                        if let Err(err) = sink.send(Message::Close(None)).await {
                            debug!(error = %err, "close frame send failed");
                        }
                    }
                }
            },

            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => {
                    match codec::decode::<WatchResponse>(&bytes) {
                        Ok(response) => {
                            let proposal = SessionProposal {
                                announcement: response.session,
                                decided: Arc::new(AtomicBool::new(false)),
                                commands: proposal_commands.clone(),
                            };
                            debug!(session = %proposal.id(), player = %proposal.profile().username, "session proposed");
                            if events.send(WatchEvent::Proposal(proposal)).await.is_err()
                                && !closing
                            {
                                closing = true;
                                let _ = sink.send(Message::Close(None)).await;
                            }
                        }
                        Err(err) => {
                            // fatal to the stream; nothing partial reaches the consumer
                            warn!(error = %err, "undecodable watch frame, closing stream");
                            let frame = CloseFrame {
                                code: CloseCode::Protocol,
                                reason: err.to_string().into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            return Terminal::Error(GateError::Codec(format!(
                                "watch frame decode failed: {err}"
                            )));
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    close_frame = frame.map(|f| (u16::from(f.code), f.reason.into_owned()));
                }
                Some(Ok(_)) => {} // text/ping/pong: nothing to do
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => break,
                Some(Err(err)) => {
                    return Terminal::Error(GateError::Transport(err.to_string()));
                }
            },
        }
    }

    match close_frame {
        Some((code, reason)) if code != u16::from(CloseCode::Normal) => Terminal::Error(
            GateError::Protocol(format!("watch stream closed with code {code}: {reason}")),
        ),
        _ => Terminal::Completed,
    }
}

async fn send_rejection<S>(sink: &mut S, rejection: SessionRejection) -> GateResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let request = WatchRequest {
        session_rejection: Some(rejection),
    };
    let bytes = codec::encode(&request)?;
    sink.send(Message::Binary(bytes))
        .await
        .map_err(|e| GateError::Transport(format!("rejection send failed: {e}")))
}

/// Prefer a server-supplied diagnostic body over the generic transport
/// error when the broker rejected the stream outright.
fn connect_error(err: WsError) -> GateError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .into_body()
                .filter(|b| !b.is_empty())
                .map(|b| String::from_utf8_lossy(&b).into_owned());
            match body {
                Some(body) => GateError::Transport(format!(
                    "watch endpoint rejected stream ({status}): {body}"
                )),
                None => GateError::Transport(format!("watch endpoint rejected stream ({status})")),
            }
        }
        other => GateError::Transport(other.to_string()),
    }
}
