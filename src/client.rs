//! The client facade: one gateway session, its cache, and the listeners fed from it.
//!
//! # Examples
//!
//! ```rust, no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use realtime_gateway_sdk::cache::Cache;
//! use realtime_gateway_sdk::client::{Client, Config};
//! use realtime_gateway_sdk::event::{Event, Interest, Listener};
//!
//! struct Log;
//!
//! #[async_trait]
//! impl Listener for Log {
//!     fn interest(&self) -> Interest {
//!         Interest::MESSAGE
//!     }
//!
//!     async fn on_event(&self, event: Arc<Event>, _cache: Arc<Cache>) {
//!         if let Event::MessageCreate(message) = event.as_ref() {
//!             println!("{}: {}", message.author_id, message.content);
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::new(Config::from_env()?)?;
//!     client.add_listener(Log);
//!     client.connect().await?;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_stream::try_stream;
use bon::Builder;
use dashmap::DashMap;
use futures::Stream;
use secrecy::SecretString;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::cache::{Cache, CacheConfig};
use crate::error::{Error, Synchronization};
use crate::event::{Event, Listener, TranslateError, translate};
use crate::gateway::payload::{
    Activity, Identify, IdentifyProperties, OnlineStatus, RequestGuildMembers, StatusUpdate,
};
use crate::gateway::{Dispatch, DispatchReceiver, Payload, SessionManager, Status};
use crate::model::{Channel, Message, User};
use crate::rest::{self, HttpRest, MessagesRequest, Rest};
use crate::types::Snowflake;
use crate::ws::WsError;
use crate::ws::config::Config as WsConfig;
use crate::{Result, TOKEN_VAR};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v6";
const DEFAULT_EVENT_CAPACITY: usize = 1024;
const GATEWAY_VERSION: &str = "6";
const GATEWAY_ENCODING: &str = "json";

/// Configuration for [`Client`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Bot token. Sent only in `Identify`, `Resume` and the REST `Authorization` header.
    #[builder(into)]
    token: SecretString,
    /// Skip `GET /gateway` and connect here instead
    gateway_url: Option<Url>,
    /// REST API root. Defaults to `https://discord.com/api/v6`.
    #[builder(into, default = DEFAULT_API_BASE.to_owned())]
    api_base: String,
    #[builder(default)]
    properties: IdentifyProperties,
    #[builder(default)]
    ws: WsConfig,
    #[builder(default)]
    cache: CacheConfig,
    /// How many events [`Client::events`] buffers per subscriber before it lags
    #[builder(default = DEFAULT_EVENT_CAPACITY)]
    event_capacity: usize,
}

impl Config {
    /// Default configuration with the token read from [`TOKEN_VAR`].
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_VAR)
            .map_err(|e| Error::validation(format!("{TOKEN_VAR} is not usable: {e}")))?;
        Ok(Self::builder().token(token).build())
    }
}

/// Handle returned by [`Client::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

type Listeners = DashMap<ListenerId, Arc<dyn Listener>>;

/// A live session and the task feeding its dispatches into the cache.
struct Session {
    manager: SessionManager,
    pump: JoinHandle<()>,
}

struct ClientInner {
    config: Config,
    rest: Arc<dyn Rest>,
    cache: Arc<Cache>,
    listeners: Arc<Listeners>,
    events: broadcast::Sender<Arc<Event>>,
    status: watch::Sender<Status>,
    fatal: watch::Sender<Option<Arc<Error>>>,
    session: Mutex<Option<Session>>,
}

/// Gateway client. Cheap to clone; all clones share one session and one cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client that talks REST over HTTPS at [`Config`]'s `api_base`.
    pub fn new(config: Config) -> Result<Self> {
        let base = Url::parse(&config.api_base)?;
        let rest = HttpRest::new(base, config.token.clone())?;
        Self::with_rest(config, Arc::new(rest))
    }

    /// Create a client with a custom REST collaborator.
    pub fn with_rest(config: Config, rest: Arc<dyn Rest>) -> Result<Self> {
        if config.event_capacity == 0 {
            return Err(Error::validation("event_capacity must be at least 1"));
        }

        let (events, _) = broadcast::channel(config.event_capacity);
        let cache = Arc::new(Cache::new(config.cache));

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                rest,
                cache,
                listeners: Arc::new(DashMap::new()),
                events,
                status: watch::channel(Status::Disconnected).0,
                fatal: watch::channel(None).0,
                session: Mutex::new(None),
            }),
        })
    }

    /// Resolve the gateway, open the socket and wait for the first `READY`.
    ///
    /// Fails without retrying when the first session cannot be established.
    /// Once this returns, reconnects happen in the background and only
    /// unrecoverable failures surface, through [`errors`](Self::errors).
    pub async fn connect(&self) -> Result<()> {
        if self.session_active() {
            return Err(Error::validation("client is already connected"));
        }

        let mut url = match &self.inner.config.gateway_url {
            Some(url) => url.clone(),
            None => rest::get_gateway(self.inner.rest.as_ref()).await?,
        };
        url.query_pairs_mut()
            .clear()
            .append_pair("v", GATEWAY_VERSION)
            .append_pair("encoding", GATEWAY_ENCODING);

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Connecting to gateway");

        let identify = Identify::new(
            self.inner.config.token.clone(),
            self.inner.config.properties.clone(),
        );
        self.inner.fatal.send_replace(None);

        let (manager, dispatches) =
            SessionManager::connect(url, identify, self.inner.config.ws.clone()).await?;
        self.inner.status.send_replace(manager.status());

        let pump = tokio::spawn(pump(
            Arc::clone(&self.inner),
            dispatches,
            manager.status_receiver(),
            manager.fatal_receiver(),
        ));

        let mut session = self.lock_session();
        if session.as_ref().is_some_and(|other| !other.pump.is_finished()) {
            // Another `connect` raced this one and won
            pump.abort();
            return Err(Synchronization.into());
        }
        *session = Some(Session { manager, pump });
        Ok(())
    }

    /// Close the session with 1000 and stop reconnecting.
    ///
    /// Waits at most the configured close timeout for the server to confirm.
    pub async fn disconnect(&self) {
        let Some(session) = self.lock_session().take() else {
            return;
        };

        session.manager.disconnect().await;
        drop(session.manager);
        _ = session.pump.await;
        self.inner.status.send_replace(Status::Disconnected);
    }

    /// Register a listener. Each matching event is delivered on its own task.
    pub fn add_listener<L: Listener>(&self, listener: L) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.inner.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Returns `false` if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(&id).is_some()
    }

    /// Every event from now on, in dispatch order.
    ///
    /// A subscriber that falls more than `event_capacity` events behind receives a
    /// [`WsError::Lagged`] error and continues with the oldest retained event.
    pub fn events(&self) -> impl Stream<Item = Result<Arc<Event>>> + use<> {
        let mut rx = self.inner.events.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(count, "Event stream lagged");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Holds the error that ended the session for good, once there is one.
    #[must_use]
    pub fn errors(&self) -> watch::Receiver<Option<Arc<Error>>> {
        self.inner.fatal.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> Status {
        *self.inner.status.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.inner.cache)
    }

    /// The channel from the cache, or fetched and cached on a miss.
    ///
    /// A guild channel is only cached once its guild is resolved; until then this
    /// fails with a translation error.
    pub async fn channel(&self, id: Snowflake) -> Result<Channel> {
        if let Some(channel) = self.inner.cache.channel(id) {
            return Ok(channel);
        }

        let packet = rest::get_channel(self.inner.rest.as_ref(), id).await?;
        let guild_id = packet.guild_id;
        self.inner.cache.push_channel(packet).ok_or_else(|| {
            guild_id
                .map_or(TranslateError::MissingChannel(id), TranslateError::MissingGuild)
                .into()
        })
    }

    /// The user from the cache, or fetched and cached on a miss.
    pub async fn user(&self, id: Snowflake) -> Result<Arc<User>> {
        if let Some(user) = self.inner.cache.user(id) {
            return Ok(user);
        }

        let packet = rest::get_user(self.inner.rest.as_ref(), id).await?;
        Ok(self.inner.cache.push_user(packet))
    }

    /// Fetch channel history and add it to the channel's message store.
    ///
    /// History always comes from the API: the store only holds recent messages.
    pub async fn messages(
        &self,
        channel_id: Snowflake,
        request: &MessagesRequest,
    ) -> Result<Vec<Arc<Message>>> {
        let packets = rest::get_messages(self.inner.rest.as_ref(), channel_id, request).await?;
        Ok(packets
            .into_iter()
            .map(|packet| self.inner.cache.push_message(packet))
            .collect())
    }

    /// Post a message. The `MESSAGE_CREATE` dispatch that follows merges into
    /// the same cached record.
    pub async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<Arc<Message>> {
        let packet = rest::create_message(self.inner.rest.as_ref(), channel_id, content).await?;
        Ok(self.inner.cache.push_message(packet))
    }

    pub fn update_status(&self, status: OnlineStatus, game: Option<Activity>) -> Result<()> {
        self.send(Payload::StatusUpdate(StatusUpdate::new(status, game)))
    }

    /// Ask for members of a large guild. They arrive as `GUILD_MEMBERS_CHUNK` dispatches.
    pub fn request_guild_members(
        &self,
        guild_id: Snowflake,
        query: String,
        limit: u32,
    ) -> Result<()> {
        self.send(Payload::RequestGuildMembers(RequestGuildMembers::new(
            guild_id, query, limit,
        )))
    }

    fn send(&self, payload: Payload) -> Result<()> {
        match self.lock_session().as_ref() {
            Some(session) => session.manager.send(payload),
            None => Err(Error::validation("client is not connected")),
        }
    }

    fn session_active(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|session| !session.pump.is_finished())
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply dispatches to the cache in order and fan the resulting events out.
///
/// Also mirrors the session's status and fatal error into the client's own
/// channels, so subscribers survive reconnects and new sessions.
async fn pump(
    inner: Arc<ClientInner>,
    mut dispatches: DispatchReceiver,
    mut status: watch::Receiver<Status>,
    mut fatal: watch::Receiver<Option<Arc<Error>>>,
) {
    loop {
        tokio::select! {
            biased;

            dispatch = dispatches.recv() => match dispatch {
                Some(dispatch) => deliver(&inner, dispatch),
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                inner.status.send_replace(*status.borrow_and_update());
            }
            changed = fatal.changed() => {
                if changed.is_err() {
                    break;
                }
                let error = fatal.borrow_and_update().clone();
                inner.fatal.send_replace(error);
            }
        }
    }

    inner.status.send_replace(*status.borrow());
    if let Some(error) = fatal.borrow().clone() {
        inner.fatal.send_replace(Some(error));
    }
}

fn deliver(inner: &ClientInner, dispatch: Dispatch) {
    let event = match translate(&inner.cache, dispatch) {
        Ok(event) => Arc::new(event),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Dropping dispatch");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            return;
        }
    };

    #[cfg(feature = "tracing")]
    tracing::trace!(kind = %event.kind(), "Delivering event");

    // No subscribers is not an error
    _ = inner.events.send(Arc::clone(&event));

    for entry in inner.listeners.iter() {
        let listener = entry.value();
        if !listener.interest().wants(&event) {
            continue;
        }

        let listener = Arc::clone(listener);
        let event = Arc::clone(&event);
        let cache = Arc::clone(&inner.cache);
        tokio::spawn(async move { listener.on_event(event, cache).await });
    }
}
