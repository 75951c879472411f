#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use httpmock::MockServer;
use realtime_gateway_sdk::gateway::payload::{Identify, IdentifyProperties};
use realtime_gateway_sdk::ws::config::{Config, ReconnectConfig};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

pub const TOKEN: &str = "MTk4NjIyNDgzNDcxOTI1MjQ4.Cl2FMQ.ZnCjm1XVW7vRze4b7Cq4se7kKWs";
pub const SESSION_ID: &str = "d1b5e2a3c4f60718";
pub const BOT_ID: &str = "80351110224678912";

/// How long a test waits for the next frame before failing.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Fast reconnects so tests do not sit in backoff.
#[must_use]
pub fn ws_config() -> Config {
    Config::default()
        .with_hello_timeout(Duration::from_secs(2))
        .with_close_timeout(Duration::from_millis(500))
        .with_invalid_session_delay(Duration::from_millis(50))
        .with_reconnect(ReconnectConfig::new(
            Some(5),
            Duration::from_millis(20),
            Duration::from_millis(100),
            2.0,
        ))
}

#[must_use]
pub fn identify() -> Identify {
    Identify::new(
        SecretString::from(TOKEN),
        IdentifyProperties::new("linux", "tests", "tests"),
    )
}

enum Action {
    Send(String),
    Close(u16, String),
}

/// A gateway that hands every accepted socket to the test as a [`MockConnection`].
pub struct MockGateway {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connections_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
                let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Value>();
                let (closed_tx, closed_rx) = mpsc::unbounded_channel::<Option<u16>>();

                if connections_tx
                    .send(MockConnection {
                        actions: action_tx,
                        frames: frame_rx,
                        closed: closed_rx,
                    })
                    .is_err()
                {
                    break;
                }

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str(text.as_str()) {
                                        drop(frame_tx.send(value));
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    drop(closed_tx.send(frame.map(|f| u16::from(f.code))));
                                    break;
                                }
                                Some(Ok(_)) => {}
                                _ => {
                                    drop(closed_tx.send(None));
                                    break;
                                }
                            },
                            action = action_rx.recv() => match action {
                                Some(Action::Send(text)) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Action::Close(code, reason)) => {
                                    let frame = CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: reason.into(),
                                    };
                                    drop(write.send(Message::Close(Some(frame))).await);
                                }
                                None => break,
                            }
                        }
                    }
                });
            }
        });

        Self { addr, connections }
    }

    #[must_use]
    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}/", self.addr)).unwrap()
    }

    /// The next socket the client opens.
    pub async fn accept(&mut self) -> MockConnection {
        timeout(FRAME_TIMEOUT, self.connections.recv())
            .await
            .expect("client connected in time")
            .expect("gateway task alive")
    }

    /// Accept, send `Hello`, and return the client's handshake frame.
    pub async fn accept_with_hello(&mut self) -> (MockConnection, Value) {
        let mut connection = self.accept().await;
        connection.hello(45_000);
        let handshake = connection.recv_handshake().await;
        (connection, handshake)
    }
}

pub struct MockConnection {
    actions: mpsc::UnboundedSender<Action>,
    frames: mpsc::UnboundedReceiver<Value>,
    closed: mpsc::UnboundedReceiver<Option<u16>>,
}

impl MockConnection {
    pub fn send(&self, frame: &Value) {
        drop(self.actions.send(Action::Send(frame.to_string())));
    }

    pub fn hello(&self, heartbeat_interval: u64) {
        self.send(&json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval } }));
    }

    /// Send `READY` for [`SESSION_ID`] listing `guilds` as unavailable.
    pub fn ready(&self, sequence: u64, guilds: &[&str]) {
        let guilds: Vec<Value> = guilds
            .iter()
            .map(|id| json!({ "id": id, "unavailable": true }))
            .collect();
        self.dispatch(
            sequence,
            "READY",
            json!({
                "v": 6,
                "user": { "id": BOT_ID, "username": "Nelly", "discriminator": "1337", "bot": true },
                "private_channels": [],
                "guilds": guilds,
                "session_id": SESSION_ID
            }),
        );
    }

    pub fn dispatch(&self, sequence: u64, name: &str, data: Value) {
        self.send(&json!({ "op": 0, "s": sequence, "t": name, "d": data }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        drop(self.actions.send(Action::Close(code, reason.to_owned())));
    }

    /// The next frame the client sent, including heartbeats.
    pub async fn recv(&mut self) -> Value {
        timeout(FRAME_TIMEOUT, self.frames.recv())
            .await
            .expect("frame arrived in time")
            .expect("connection open")
    }

    /// The next frame with opcode `op`, skipping any others.
    pub async fn recv_op(&mut self, op: u64) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["op"] == op {
                return frame;
            }
        }
    }

    /// The next `Identify` (2) or `Resume` (6).
    pub async fn recv_handshake(&mut self) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["op"] == 2 || frame["op"] == 6 {
                return frame;
            }
        }
    }

    /// The close code the client sent, or `None` if the socket just ended.
    pub async fn recv_close(&mut self) -> Option<u16> {
        timeout(FRAME_TIMEOUT, self.closed.recv())
            .await
            .expect("socket ended in time")
            .flatten()
    }
}

/// A REST server answering `GET /gateway` with `gateway`.
pub fn mock_gateway_endpoint(server: &MockServer, gateway: &Url) {
    server.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/gateway");
        then.status(StatusCode::OK)
            .json_body(json!({ "url": gateway.as_str() }));
    });
}

#[must_use]
pub fn guild_create(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "owner_id": BOT_ID,
        "member_count": 1,
        "roles": [{ "id": id, "name": "@everyone", "position": 0, "permissions": 104_324_161 }],
        "channels": [
            { "id": format!("{id}1"), "type": 0, "name": "general", "position": 0 }
        ],
        "members": [
            { "user": { "id": BOT_ID, "username": "Nelly", "discriminator": "1337" }, "roles": [] }
        ]
    })
}
