#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
#[cfg(feature = "tracing")]
use tracing::{debug, error, trace, warn};
use url::Url;

use super::close_code::{CloseCode, PostCloseAction};
use super::dispatch::Dispatch;
use super::heartbeat::HeartbeatMonitor;
use super::payload::{Hello, Identify, Payload, decode, encode};
use super::session::{Handshake, SessionState, Status};
use crate::error::Error;
use crate::ws::WsError;
use crate::ws::config::Config;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<WsStream, Message>;
type Reader = SplitStream<WsStream>;

/// Dispatches in the order they were received, after their sequence number was recorded.
pub type DispatchReceiver = mpsc::UnboundedReceiver<Dispatch>;

/// Close code sent when the client drops a connection it intends to resume.
/// Anything but 1000/1001 keeps the session alive on the server.
const RESUMABLE_CLOSE_CODE: u16 = 4000;

enum Command {
    Send(Payload),
    Disconnect(oneshot::Sender<()>),
}

/// How one connection ended.
enum Outcome {
    /// The caller asked to stop, or nobody consumes dispatches anymore
    Disconnected(Option<oneshot::Sender<()>>),
    Closed { code: Option<u16>, reason: String },
    Dropped(Error),
    HeartbeatDeath,
    Reconnect,
}

enum Frame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Failed(Error),
    Skip,
}

fn classify(
    frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Frame {
    match frame {
        Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_owned()),
        Some(Ok(Message::Close(frame))) => match frame {
            Some(frame) => Frame::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
            },
            None => Frame::Closed {
                code: None,
                reason: String::new(),
            },
        },
        // Pings are answered by tungstenite; binary frames are not part of the JSON protocol
        Some(Ok(_)) => Frame::Skip,
        Some(Err(e)) => Frame::Failed(e.into()),
        None => Frame::Failed(WsError::ConnectionClosed.into()),
    }
}

/// Owns the gateway socket and drives the session state machine across reconnects.
///
/// The socket lives in a background task. [`SessionManager::connect`] returns once
/// the first session is live; from then on the task reconnects on its own,
/// following the close code table, and reports only unrecoverable failures through
/// [`fatal_receiver`](Self::fatal_receiver). Dropping the manager shuts the task down.
#[derive(Debug)]
pub struct SessionManager {
    status_rx: watch::Receiver<Status>,
    fatal_rx: watch::Receiver<Option<Arc<Error>>>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl SessionManager {
    /// Open the socket at `url` and establish a session.
    ///
    /// Fails if the socket cannot be opened, `Hello` does not arrive within
    /// [`Config::hello_timeout`], or the connection ends before the first `READY`.
    pub async fn connect(
        url: Url,
        identify: Identify,
        config: Config,
    ) -> Result<(Self, DispatchReceiver)> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::Disconnected);
        let (fatal_tx, fatal_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let runner = Runner {
            url,
            identify,
            config,
            state: SessionState::new(),
            status_tx,
            fatal_tx,
            dispatch_tx,
            command_rx,
            ready_tx: Some(ready_tx),
            went_live: false,
        };
        tokio::spawn(runner.run());

        match ready_rx.await {
            Ok(Ok(())) => Ok((
                Self {
                    status_rx,
                    fatal_rx,
                    command_tx,
                },
                dispatch_rx,
            )),
            Ok(Err(e)) => Err(e),
            Err(_closed) => Err(WsError::ConnectionClosed.into()),
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }

    /// Holds the error that ended the session for good, once there is one.
    #[must_use]
    pub fn fatal_receiver(&self) -> watch::Receiver<Option<Arc<Error>>> {
        self.fatal_rx.clone()
    }

    /// Queue a status update or guild member request.
    ///
    /// Heartbeats and handshakes belong to the session and are rejected.
    pub fn send(&self, payload: Payload) -> Result<()> {
        if !matches!(
            payload,
            Payload::StatusUpdate(_) | Payload::RequestGuildMembers(_)
        ) {
            return Err(Error::validation(format!(
                "{:?} frames are managed by the session",
                payload.opcode()
            )));
        }

        self.command_tx
            .send(Command::Send(payload))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Stop heartbeating, close the socket with 1000 and wait for the server to
    /// confirm, at most [`Config::close_timeout`].
    pub async fn disconnect(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(Command::Disconnect(reply_tx)).is_ok() {
            _ = reply_rx.await;
        }
    }
}

struct Runner {
    url: Url,
    identify: Identify,
    config: Config,
    state: SessionState,
    status_tx: watch::Sender<Status>,
    fatal_tx: watch::Sender<Option<Arc<Error>>>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    /// Present until the first session goes live
    ready_tx: Option<oneshot::Sender<Result<()>>>,
    went_live: bool,
}

impl Runner {
    /// Main connection loop with automatic reconnection.
    async fn run(mut self) {
        let mut attempt = 0_u32;
        let mut backoff: ExponentialBackoff = self.config.reconnect.clone().into();

        loop {
            self.went_live = false;
            self.set_status(Status::Connecting);

            let outcome = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => self.handle_connection(stream).await,
                Err(e) => Outcome::Dropped(e.into()),
            };

            if self.went_live {
                attempt = 0;
                backoff.reset();
            }

            let action = match outcome {
                Outcome::Disconnected(reply) => {
                    self.set_status(Status::Disconnected);
                    if let Some(reply) = reply {
                        _ = reply.send(());
                    }
                    return;
                }
                Outcome::Closed { code, reason } => {
                    let action = self.state.on_close(code);

                    #[cfg(feature = "tracing")]
                    debug!(?code, %reason, %action, "Gateway closed the connection");

                    if action == PostCloseAction::Close || self.ready_tx.is_some() {
                        let reason = if reason.is_empty() {
                            code.and_then(CloseCode::from_u16)
                                .map_or("closed by the gateway", CloseCode::description)
                                .to_owned()
                        } else {
                            reason
                        };
                        self.finish(Error::session_closed(code, reason));
                        return;
                    }
                    action
                }
                Outcome::Dropped(e) => {
                    if self.ready_tx.is_some() {
                        self.finish(e);
                        return;
                    }

                    #[cfg(feature = "tracing")]
                    warn!(error = %e, "Gateway connection dropped");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;

                    self.state.on_close(Some(CloseCode::Abnormal.as_u16()))
                }
                Outcome::HeartbeatDeath => {
                    if self.ready_tx.is_some() {
                        self.finish(WsError::HeartbeatTimeout.into());
                        return;
                    }
                    self.state.on_heartbeat_death()
                }
                Outcome::Reconnect => self.state.on_reconnect(),
            };

            attempt = attempt.saturating_add(1);
            if let Some(max) = self.config.reconnect.max_attempts
                && attempt > max
            {
                self.finish(Error::session_closed(
                    None,
                    format!("gave up after {max} reconnection attempts"),
                ));
                return;
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect.max_backoff);

            #[cfg(feature = "tracing")]
            debug!(%action, attempt, ?delay, "Reconnecting");
            #[cfg(not(feature = "tracing"))]
            let _ = &action;

            if !self.wait(delay).await {
                return;
            }
        }
    }

    /// Sleep between two attempts. Returns `false` if the caller disconnected meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                command = self.command_rx.recv() => match command {
                    Some(Command::Send(payload)) => {
                        #[cfg(feature = "tracing")]
                        warn!(op = ?payload.opcode(), "Dropping payload sent while reconnecting");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &payload;
                    }
                    Some(Command::Disconnect(reply)) => {
                        self.set_status(Status::Disconnected);
                        _ = reply.send(());
                        return false;
                    }
                    None => {
                        self.set_status(Status::Disconnected);
                        return false;
                    }
                }
            }
        }
    }

    /// Handle one open socket, from `Hello` until it ends.
    async fn handle_connection(&mut self, stream: WsStream) -> Outcome {
        let (mut write, mut read) = stream.split();
        self.set_status(Status::AwaitingHello);

        let hello = match timeout(self.config.hello_timeout, Self::await_hello(&mut read)).await {
            Ok(Ok(hello)) => hello,
            Ok(Err(outcome)) => return outcome,
            Err(_elapsed) => return Outcome::Dropped(WsError::Timeout.into()),
        };

        #[cfg(feature = "tracing")]
        debug!(heartbeat_interval = hello.heartbeat_interval, "Received Hello");

        let handshake = self.state.on_hello(hello.heartbeat_interval);
        self.publish();
        if let Err(e) = Self::send(&mut write, &handshake.payload(&self.identify)).await {
            return Outcome::Dropped(e);
        }

        #[cfg(feature = "tracing")]
        debug!(?handshake, "Sent handshake");

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let (beat_tx, mut beat_rx) = mpsc::unbounded_channel();
        let (death_tx, mut death_rx) = mpsc::unbounded_channel();
        let heartbeat = HeartbeatMonitor::new(beat_tx);
        heartbeat.start(interval, move || {
            _ = death_tx.send(());
        });

        // Set after a non-resumable InvalidSession
        let mut identify_at: Option<Instant> = None;

        let outcome = loop {
            tokio::select! {
                frame = read.next() => match classify(frame) {
                    Frame::Text(text) => {
                        #[cfg(feature = "tracing")]
                        trace!(%text, "Received gateway frame");

                        match decode(&text) {
                            Ok(payload) => {
                                if let Some(outcome) = self
                                    .handle_payload(payload, &heartbeat, &mut write, &mut identify_at)
                                    .await
                                {
                                    break outcome;
                                }
                            }
                            Err(e) => {
                                if let Some(sequence) = e.sequence() {
                                    self.state.on_dispatch(sequence);
                                }

                                #[cfg(feature = "tracing")]
                                warn!(%text, error = %e, "Dropping undecodable frame");
                                #[cfg(not(feature = "tracing"))]
                                let _ = (&text, &e);
                            }
                        }
                    }
                    Frame::Closed { code, reason } => break Outcome::Closed { code, reason },
                    Frame::Failed(e) => break Outcome::Dropped(e),
                    Frame::Skip => {}
                },

                Some(()) = beat_rx.recv() => {
                    let beat = Payload::Heartbeat(self.state.last_sequence());
                    if let Err(e) = Self::send(&mut write, &beat).await {
                        break Outcome::Dropped(e);
                    }
                }

                Some(()) = death_rx.recv() => {
                    Self::close_with(&mut write, RESUMABLE_CLOSE_CODE).await;
                    break Outcome::HeartbeatDeath;
                }

                () = sleep_until(identify_at.unwrap_or_else(Instant::now)), if identify_at.is_some() => {
                    identify_at = None;
                    let identify = Handshake::Identify.payload(&self.identify);
                    if let Err(e) = Self::send(&mut write, &identify).await {
                        break Outcome::Dropped(e);
                    }
                }

                command = self.command_rx.recv() => match command {
                    Some(Command::Send(payload)) => {
                        if let Err(e) = Self::send(&mut write, &payload).await {
                            break Outcome::Dropped(e);
                        }
                    }
                    Some(Command::Disconnect(reply)) => {
                        self.set_status(Status::Closing);
                        heartbeat.kill();
                        Self::close_gracefully(&mut write, &mut read, self.config.close_timeout).await;
                        break Outcome::Disconnected(Some(reply));
                    }
                    None => {
                        self.set_status(Status::Closing);
                        heartbeat.kill();
                        Self::close_gracefully(&mut write, &mut read, self.config.close_timeout).await;
                        break Outcome::Disconnected(None);
                    }
                }
            }
        };

        heartbeat.kill();
        outcome
    }

    async fn await_hello(read: &mut Reader) -> std::result::Result<Hello, Outcome> {
        loop {
            match classify(read.next().await) {
                Frame::Text(text) => {
                    return match decode(&text) {
                        Ok(Payload::Hello(hello)) => Ok(hello),
                        Ok(other) => Err(Outcome::Dropped(
                            WsError::InvalidMessage(format!(
                                "expected Hello, received {:?}",
                                other.opcode()
                            ))
                            .into(),
                        )),
                        Err(e) => Err(Outcome::Dropped(e.into())),
                    };
                }
                Frame::Closed { code, reason } => return Err(Outcome::Closed { code, reason }),
                Frame::Failed(e) => return Err(Outcome::Dropped(e)),
                Frame::Skip => {}
            }
        }
    }

    /// React to one decoded payload. Returns the outcome when the connection must end.
    async fn handle_payload(
        &mut self,
        payload: Payload,
        heartbeat: &HeartbeatMonitor,
        write: &mut Writer,
        identify_at: &mut Option<Instant>,
    ) -> Option<Outcome> {
        match payload {
            Payload::Heartbeat(_) => heartbeat.beat_now(),
            Payload::HeartbeatAck => heartbeat.acknowledge(),
            Payload::Reconnect => {
                #[cfg(feature = "tracing")]
                debug!("Gateway requested a reconnect");
                Self::close_with(write, RESUMABLE_CLOSE_CODE).await;
                return Some(Outcome::Reconnect);
            }
            Payload::InvalidSession { resumable } => {
                #[cfg(feature = "tracing")]
                debug!(resumable, "Session invalidated");

                let handshake = self.state.on_invalid_session(resumable);
                self.publish();
                match handshake {
                    Handshake::Identify => {
                        *identify_at = Some(Instant::now() + self.config.invalid_session_delay);
                    }
                    resume @ Handshake::Resume { .. } => {
                        if let Err(e) = Self::send(write, &resume.payload(&self.identify)).await {
                            return Some(Outcome::Dropped(e));
                        }
                    }
                }
            }
            Payload::Dispatch { sequence, event } => {
                self.state.on_dispatch(sequence);

                let went_live = match &event {
                    Dispatch::Ready(ready) => {
                        self.state.on_ready(ready.session_id.clone());
                        true
                    }
                    Dispatch::Resumed(_) => {
                        self.state.on_resumed();
                        true
                    }
                    _ => false,
                };

                if self.dispatch_tx.send(event).is_err() {
                    return Some(Outcome::Disconnected(None));
                }
                if went_live {
                    self.on_live();
                }
            }
            other => {
                #[cfg(feature = "tracing")]
                warn!(op = ?other.opcode(), "Ignoring unexpected payload");
                #[cfg(not(feature = "tracing"))]
                let _ = &other;
            }
        }

        None
    }

    fn on_live(&mut self) {
        self.went_live = true;
        self.publish();

        #[cfg(feature = "tracing")]
        debug!(session_id = ?self.state.session_id(), "Session is live");

        if let Some(ready_tx) = self.ready_tx.take() {
            _ = ready_tx.send(Ok(()));
        }
    }

    /// End the run loop with `error`: returned from `connect` before the first
    /// session, published as fatal afterwards.
    fn finish(&mut self, error: Error) {
        self.set_status(Status::Disconnected);

        match self.ready_tx.take() {
            Some(ready_tx) => {
                _ = ready_tx.send(Err(error));
            }
            None => {
                #[cfg(feature = "tracing")]
                error!(error = %error, "Gateway session ended");
                self.fatal_tx.send_replace(Some(Arc::new(error)));
            }
        }
    }

    fn set_status(&mut self, status: Status) {
        self.state.set_status(status);
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.state.status());
    }

    async fn send(write: &mut Writer, payload: &Payload) -> Result<()> {
        let text = encode(payload)?;

        #[cfg(feature = "tracing")]
        trace!(op = ?payload.opcode(), "Sending gateway frame");

        write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close_with(write: &mut Writer, code: u16) {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        _ = write.send(Message::Close(Some(frame))).await;
    }

    async fn close_gracefully(write: &mut Writer, read: &mut Reader, wait: Duration) {
        let frame = CloseFrame {
            code: WsCloseCode::Normal,
            reason: "".into(),
        };
        if write.send(Message::Close(Some(frame))).await.is_err() {
            return;
        }

        let confirmed = timeout(wait, async {
            while let Some(Ok(message)) = read.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await;

        #[cfg(feature = "tracing")]
        if confirmed.is_err() {
            debug!(?wait, "Close handshake timed out");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = confirmed;
    }
}
