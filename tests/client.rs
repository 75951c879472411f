#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt as _};
use httpmock::MockServer;
use realtime_gateway_sdk::cache::Cache;
use realtime_gateway_sdk::client::{Client, Config};
use realtime_gateway_sdk::error::SessionClosed;
use realtime_gateway_sdk::event::{Event, Interest, Listener};
use realtime_gateway_sdk::gateway::Status;
use realtime_gateway_sdk::gateway::payload::OnlineStatus;
use realtime_gateway_sdk::types::Snowflake;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::common::{
    BOT_ID, MockConnection, MockGateway, guild_create, mock_gateway_endpoint, ws_config,
};

type Events = Pin<Box<dyn Stream<Item = realtime_gateway_sdk::Result<Arc<Event>>> + Send>>;

const GUILD_ID: Snowflake = Snowflake::new(2001);

fn config(http: &MockServer) -> Config {
    Config::builder()
        .token(common::TOKEN)
        .api_base(http.base_url())
        .ws(ws_config())
        .build()
}

async fn next_event(events: &mut Events) -> Arc<Event> {
    timeout(Duration::from_secs(2), events.next())
        .await
        .expect("event in time")
        .expect("stream open")
        .expect("no lag")
}

/// Connect through `GET /gateway` and complete `READY` listing one pending guild.
async fn connected(
    http: &MockServer,
    gateway: &mut MockGateway,
) -> (Client, Events, MockConnection) {
    mock_gateway_endpoint(http, &gateway.url());
    let client = Client::new(config(http)).unwrap();
    let mut events: Events = Box::pin(client.events());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let (connection, handshake) = gateway.accept_with_hello().await;
    assert_eq!(handshake["op"], 2);
    connection.ready(1, &["2001"]);
    connecting.await.unwrap().unwrap();

    let ready = next_event(&mut events).await;
    let Event::Ready { user, guilds, .. } = ready.as_ref() else {
        panic!("READY comes first, got {ready:?}");
    };
    assert_eq!(user.id.to_string(), BOT_ID);
    assert_eq!(guilds, &vec![GUILD_ID]);

    (client, events, connection)
}

#[tokio::test]
async fn pending_guild_resolves_for_waiters() {
    let http = MockServer::start();
    let mut gateway = MockGateway::start().await;
    let (client, mut events, connection) = connected(&http, &mut gateway).await;

    assert_eq!(client.state(), Status::Live);
    assert!(client.cache().guild(GUILD_ID).is_none(), "still pending");

    let waiter = {
        let cache = client.cache();
        tokio::spawn(async move { cache.wait_guild(GUILD_ID).await })
    };
    connection.dispatch(2, "GUILD_CREATE", guild_create("2001", "Lounge"));

    let guild = timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter woke")
        .unwrap()
        .expect("resolved");
    assert_eq!(guild.id, GUILD_ID);
    assert_eq!(guild.name, "Lounge");

    let event = next_event(&mut events).await;
    assert!(matches!(event.as_ref(), Event::GuildAvailable(g) if g.id == GUILD_ID));

    let current = client.cache().current_user().expect("pinned on READY");
    assert_eq!(current.username, "Nelly");
}

#[tokio::test]
async fn listeners_receive_messages_in_resolved_guilds() {
    struct Forward(mpsc::UnboundedSender<Arc<Event>>);

    #[async_trait]
    impl Listener for Forward {
        fn interest(&self) -> Interest {
            Interest::MESSAGE
        }

        async fn on_event(&self, event: Arc<Event>, _cache: Arc<Cache>) {
            drop(self.0.send(event));
        }
    }

    let http = MockServer::start();
    let mut gateway = MockGateway::start().await;
    let (client, mut events, connection) = connected(&http, &mut gateway).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.add_listener(Forward(tx));

    connection.dispatch(2, "GUILD_CREATE", guild_create("2001", "Lounge"));
    next_event(&mut events).await;

    connection.dispatch(
        3,
        "MESSAGE_CREATE",
        json!({
            "id": "5000", "channel_id": "20011", "guild_id": "2001", "content": "hi",
            "author": { "id": "77", "username": "ada", "discriminator": "0002" }
        }),
    );

    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("listener called")
        .unwrap();
    let Event::MessageCreate(message) = event.as_ref() else {
        panic!("only message events are delivered, got {event:?}");
    };
    assert_eq!(message.content, "hi");

    let cached = client
        .cache()
        .message(Snowflake::new(20_011), Snowflake::new(5000))
        .expect("cached");
    assert!(Arc::ptr_eq(&cached, message));
    assert!(client.cache().user(Snowflake::new(77)).is_some());
}

#[tokio::test]
async fn channel_misses_are_fetched_once() {
    let http = MockServer::start();
    let mut gateway = MockGateway::start().await;
    let (client, _events, _connection) = connected(&http, &mut gateway).await;

    let mock = http.mock(|when, then| {
        when.method(httpmock::Method::GET).path("/channels/300");
        then.status(StatusCode::OK).json_body(json!({
            "id": "300",
            "type": 1,
            "recipients": [{ "id": "77", "username": "ada", "discriminator": "0002" }]
        }));
    });

    let first = client.channel(Snowflake::new(300)).await.unwrap();
    let second = client.channel(Snowflake::new(300)).await.unwrap();

    assert!(first.is_dm());
    assert_eq!(first, second);
    assert_eq!(first.recipients, vec![Snowflake::new(77)]);
    mock.assert();
}

#[tokio::test]
async fn fatal_close_is_reported_through_errors() {
    let http = MockServer::start();
    let mut gateway = MockGateway::start().await;
    let (client, _events, connection) = connected(&http, &mut gateway).await;
    let mut errors = client.errors();

    connection.close(4004, "Authentication failed");

    let error = timeout(Duration::from_secs(2), errors.wait_for(Option::is_some))
        .await
        .expect("fatal error in time")
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(
        error.downcast_ref::<SessionClosed>().unwrap().code,
        Some(4004)
    );

    let mut state = client.state_receiver();
    timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == Status::Disconnected),
    )
    .await
    .expect("disconnected in time")
    .unwrap();
}

#[tokio::test]
async fn disconnect_closes_with_normal_code() {
    let http = MockServer::start();
    let mut gateway = MockGateway::start().await;
    let (client, _events, mut connection) = connected(&http, &mut gateway).await;

    let disconnecting = {
        let client = client.clone();
        tokio::spawn(async move { client.disconnect().await })
    };

    assert_eq!(connection.recv_close().await, Some(1000));
    disconnecting.await.unwrap();
    assert_eq!(client.state(), Status::Disconnected);
    assert!(
        client.update_status(OnlineStatus::Idle, None).is_err(),
        "no session after disconnect"
    );
}
