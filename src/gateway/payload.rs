//! Wire frames and the closed set of payloads they carry.
//!
//! Every frame is a JSON envelope `{ "op": int, "d": any, "s": int?, "t": string? }`.
//! [`decode`] turns a text frame into a [`Payload`]; [`encode`] does the reverse for
//! everything a client may send.

use std::error::Error as StdError;
use std::fmt;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dispatch::Dispatch;
use super::opcode::OpCode;
use crate::Result;
use crate::error::{Error, Kind};
use crate::serde_helpers::serialize_secret;
use crate::types::Snowflake;

/// Members above this count are only sent on request.
pub const DEFAULT_LARGE_THRESHOLD: u16 = 250;

/// A decoded gateway frame.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Payload {
    /// First frame on every connection
    Hello(Hello),
    /// Liveness ping carrying the last sequence number seen, if any
    Heartbeat(Option<u64>),
    HeartbeatAck,
    Identify(Identify),
    Resume(Resume),
    /// Server asks for a reconnect followed by a resume
    Reconnect,
    /// The session was invalidated; `resumable` says whether a resume may still succeed
    InvalidSession { resumable: bool },
    StatusUpdate(StatusUpdate),
    RequestGuildMembers(RequestGuildMembers),
    /// One domain event plus its sequence number
    Dispatch { sequence: u64, event: Dispatch },
}

impl Payload {
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::Hello(_) => OpCode::Hello,
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
            Self::Reconnect => OpCode::Reconnect,
            Self::InvalidSession { .. } => OpCode::InvalidSession,
            Self::StatusUpdate(_) => OpCode::StatusUpdate,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
            Self::Dispatch { .. } => OpCode::Dispatch,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hello {
    /// Milliseconds between two client heartbeats
    pub heartbeat_interval: u64,
}

impl Hello {
    #[must_use]
    pub const fn new(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Client properties reported on identify.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    #[must_use]
    pub fn new<S: Into<String>>(os: S, browser: S, device: S) -> Self {
        Self {
            os: os.into(),
            browser: browser.into(),
            device: device.into(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new(
            std::env::consts::OS,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_NAME"),
        )
    }
}

/// Starts a fresh session.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    #[serde(serialize_with = "serialize_secret")]
    pub token: SecretString,
    pub properties: IdentifyProperties,
    pub large_threshold: u16,
    pub compress: bool,
}

impl Identify {
    #[must_use]
    pub fn new(token: SecretString, properties: IdentifyProperties) -> Self {
        Self {
            token,
            properties,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            compress: false,
        }
    }

    #[must_use]
    pub fn with_large_threshold(mut self, large_threshold: u16) -> Self {
        self.large_threshold = large_threshold;
        self
    }
}

/// Replays a dropped session from `seq` onward.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    #[serde(serialize_with = "serialize_secret")]
    pub token: SecretString,
    pub session_id: String,
    pub seq: u64,
}

impl Resume {
    #[must_use]
    pub fn new(token: SecretString, session_id: String, seq: u64) -> Self {
        Self {
            token,
            session_id,
            seq,
        }
    }
}

/// Presence status shown to other users.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OnlineStatus {
    #[default]
    Online,
    Dnd,
    Idle,
    Invisible,
    Offline,
}

/// The "playing ..." line of a presence.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
}

impl Activity {
    #[must_use]
    pub fn playing<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: 0,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    /// Unix time in milliseconds the client went idle
    pub since: Option<u64>,
    pub game: Option<Activity>,
    pub status: OnlineStatus,
    pub afk: bool,
}

impl StatusUpdate {
    #[must_use]
    pub fn new(status: OnlineStatus, game: Option<Activity>) -> Self {
        Self {
            since: None,
            game,
            status,
            afk: false,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    /// Username prefix; empty requests every member
    pub query: String,
    /// 0 requests every member
    pub limit: u32,
}

impl RequestGuildMembers {
    #[must_use]
    pub fn new(guild_id: Snowflake, query: String, limit: u32) -> Self {
        Self {
            guild_id,
            query,
            limit,
        }
    }
}

/// A frame that could not be turned into a [`Payload`].
///
/// Always local to one frame: the frame is dropped and the connection carries on.
#[non_exhaustive]
#[derive(Debug)]
pub enum DecodeError {
    /// Not a JSON envelope at all
    Malformed(serde_json::Error),
    UnknownOpCode(u8),
    /// A client-only opcode arrived from the server
    UnexpectedOpCode(OpCode),
    MissingField(&'static str),
    /// The `d` field does not match the shape its opcode or event name requires
    InvalidData {
        what: String,
        source: serde_json::Error,
    },
    /// A dispatch envelope that decoded, with a body that did not. The sequence
    /// still counts towards the session's last sequence.
    InvalidDispatch {
        sequence: u64,
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Sequence number of a dispatch whose body failed to decode.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::InvalidDispatch { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::UnknownOpCode(op) => write!(f, "unknown opcode {op}"),
            Self::UnexpectedOpCode(op) => write!(f, "unexpected opcode {op:?} from server"),
            Self::MissingField(field) => write!(f, "frame is missing `{field}`"),
            Self::InvalidData { what, source } => write!(f, "invalid {what} data: {source}"),
            Self::InvalidDispatch { sequence, source } => {
                write!(f, "dispatch {sequence}: {source}")
            }
        }
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Malformed(e) | Self::InvalidData { source: e, .. } => Some(e),
            Self::InvalidDispatch { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::with_source(Kind::Protocol, err)
    }
}

#[derive(Deserialize)]
struct RawFrame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Serialize)]
struct OutgoingFrame<'payload, D: Serialize> {
    op: OpCode,
    d: &'payload D,
}

fn data<T: DeserializeOwned>(op: OpCode, d: Value) -> std::result::Result<T, DecodeError> {
    serde_json::from_value(d).map_err(|source| DecodeError::InvalidData {
        what: format!("{op:?}"),
        source,
    })
}

/// Decode one text frame.
pub fn decode(text: &str) -> std::result::Result<Payload, DecodeError> {
    let frame: RawFrame = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let op = OpCode::from_u8(frame.op).ok_or(DecodeError::UnknownOpCode(frame.op))?;

    let payload = match op {
        OpCode::Hello => Payload::Hello(data(op, frame.d)?),
        OpCode::Heartbeat => Payload::Heartbeat(data(op, frame.d)?),
        OpCode::HeartbeatAck => Payload::HeartbeatAck,
        OpCode::Reconnect => Payload::Reconnect,
        OpCode::InvalidSession => Payload::InvalidSession {
            resumable: data::<Option<bool>>(op, frame.d)?.unwrap_or_default(),
        },
        OpCode::Dispatch => {
            let sequence = frame.s.ok_or(DecodeError::MissingField("s"))?;
            let name = frame.t.ok_or(DecodeError::MissingField("t"))?;
            let event = Dispatch::decode(&name, frame.d).map_err(|e| {
                DecodeError::InvalidDispatch {
                    sequence,
                    source: Box::new(e),
                }
            })?;
            Payload::Dispatch { sequence, event }
        }
        OpCode::Identify
        | OpCode::StatusUpdate
        | OpCode::VoiceStateUpdate
        | OpCode::Resume
        | OpCode::RequestGuildMembers => return Err(DecodeError::UnexpectedOpCode(op)),
    };

    Ok(payload)
}

fn frame<D: Serialize>(op: OpCode, d: &D) -> Result<String> {
    Ok(serde_json::to_string(&OutgoingFrame { op, d })?)
}

/// Encode a payload as a text frame.
///
/// Dispatches are server-only and cannot be encoded.
pub fn encode(payload: &Payload) -> Result<String> {
    let op = payload.opcode();
    match payload {
        Payload::Hello(hello) => frame(op, hello),
        Payload::Heartbeat(sequence) => frame(op, sequence),
        Payload::HeartbeatAck | Payload::Reconnect => frame(op, &Value::Null),
        Payload::Identify(identify) => frame(op, identify),
        Payload::Resume(resume) => frame(op, resume),
        Payload::InvalidSession { resumable } => frame(op, resumable),
        Payload::StatusUpdate(update) => frame(op, update),
        Payload::RequestGuildMembers(request) => frame(op, request),
        Payload::Dispatch { .. } => Err(Error::validation("dispatch frames are server-only")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encoded(payload: &Payload) -> Value {
        serde_json::from_str(&encode(payload).unwrap()).unwrap()
    }

    #[test]
    fn hello_should_carry_interval() {
        let payload = decode(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#).unwrap();

        match payload {
            Payload::Hello(hello) => assert_eq!(hello.heartbeat_interval, 45_000),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn bad_dispatch_body_keeps_its_sequence() {
        let err = decode(r#"{"op":0,"s":5,"t":"MESSAGE_DELETE","d":{"id":"1"}}"#).unwrap_err();

        assert_eq!(err.sequence(), Some(5));
        assert!(err.to_string().starts_with("dispatch 5:"), "{err}");

        let err = decode(r#"{"op":0,"t":"MESSAGE_DELETE","d":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("s")), "{err:?}");
        assert_eq!(err.sequence(), None);
    }

    #[test]
    fn heartbeat_with_null_sequence() {
        let payload = decode(r#"{"op":1,"d":null}"#).unwrap();
        assert!(matches!(payload, Payload::Heartbeat(None)), "{payload:?}");

        assert_eq!(
            encoded(&Payload::Heartbeat(Some(42))),
            json!({ "op": 1, "d": 42 })
        );
    }

    #[test]
    fn invalid_session_reads_resumable_flag() {
        let payload = decode(r#"{"op":9,"d":true}"#).unwrap();
        assert!(
            matches!(payload, Payload::InvalidSession { resumable: true }),
            "{payload:?}"
        );

        let payload = decode(r#"{"op":9,"d":null}"#).unwrap();
        assert!(
            matches!(payload, Payload::InvalidSession { resumable: false }),
            "{payload:?}"
        );
    }

    #[test]
    fn unknown_event_name_is_not_an_error() {
        let payload =
            decode(r#"{"op":0,"s":3,"t":"VOICE_SERVER_UPDATE","d":{"token":"x"}}"#).unwrap();

        match payload {
            Payload::Dispatch {
                sequence,
                event: Dispatch::Unknown { name, data },
            } => {
                assert_eq!(sequence, 3);
                assert_eq!(name, "VOICE_SERVER_UPDATE");
                assert_eq!(data, json!({ "token": "x" }));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn invalid_frames_are_decode_errors() {
        assert!(matches!(
            decode("not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"op":5,"d":null}"#),
            Err(DecodeError::UnknownOpCode(5))
        ));
        assert!(matches!(
            decode(r#"{"op":10,"d":{"interval":1}}"#),
            Err(DecodeError::InvalidData { .. })
        ));
        assert!(matches!(
            decode(r#"{"op":0,"t":"RESUMED","d":{}}"#),
            Err(DecodeError::MissingField("s"))
        ));
        assert!(matches!(
            decode(r#"{"op":2,"d":{}}"#),
            Err(DecodeError::UnexpectedOpCode(OpCode::Identify))
        ));
    }

    #[test]
    fn known_event_with_wrong_shape_is_a_protocol_error() {
        let err = decode(r#"{"op":0,"s":1,"t":"MESSAGE_DELETE","d":{"id":"1"}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidData { .. }), "{err:?}");

        let err: Error = err.into();
        assert_eq!(err.kind(), Kind::Protocol);
    }

    #[test]
    fn identify_exposes_token_only_on_the_wire() {
        let identify = Identify::new(
            SecretString::from("secret-token"),
            IdentifyProperties::new("linux", "sdk", "sdk"),
        );

        assert!(!format!("{identify:?}").contains("secret-token"));
        assert_eq!(
            encoded(&Payload::Identify(identify)),
            json!({
                "op": 2,
                "d": {
                    "token": "secret-token",
                    "properties": { "os": "linux", "browser": "sdk", "device": "sdk" },
                    "large_threshold": 250,
                    "compress": false
                }
            })
        );
    }

    #[test]
    fn resume_carries_session_and_sequence() {
        let resume = Resume::new(SecretString::from("t"), "abc".to_owned(), 17);

        assert_eq!(
            encoded(&Payload::Resume(resume)),
            json!({ "op": 6, "d": { "token": "t", "session_id": "abc", "seq": 17 } })
        );
    }

    #[test]
    fn status_update_encodes_lowercase_status() {
        let update = StatusUpdate::new(OnlineStatus::Dnd, Some(Activity::playing("chess")));

        assert_eq!(
            encoded(&Payload::StatusUpdate(update)),
            json!({
                "op": 3,
                "d": { "since": null, "game": { "name": "chess", "type": 0 }, "status": "dnd", "afk": false }
            })
        );
    }
}
