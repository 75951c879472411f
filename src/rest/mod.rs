//! REST collaborator used to resolve the gateway URL and hydrate cache misses.
//!
//! The session core only needs [`Rest::send_request`]. [`HttpRest`] is the
//! reqwest-backed implementation; tests and embedders can supply their own.

use async_trait::async_trait;
use bon::Builder;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::error::Error;
use crate::model::{ChannelPacket, MessagePacket, UserPacket};
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::Snowflake;
use crate::{Result, ToQueryParams as _};

/// A completed HTTP exchange. Non-2xx statuses are still a response.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Null` when empty, or the raw text when it is not JSON
    pub body: Value,
}

impl RestResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }
}

#[async_trait]
pub trait Rest: Send + Sync + 'static {
    /// Send one request. Errors only when no response was received.
    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<RestResponse>;
}

/// [`Rest`] over HTTPS, authenticating as a bot.
#[derive(Debug, Clone)]
pub struct HttpRest {
    client: reqwest::Client,
    base: Url,
    token: SecretString,
}

impl HttpRest {
    pub fn new(base: Url, token: SecretString) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn authorization(&self) -> Result<HeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bot {}", self.token.expose_secret()))
            .map_err(|_e| Error::validation("token contains characters not allowed in a header"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[async_trait]
impl Rest for HttpRest {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, body),
            fields(method = %method, path = %path, status_code)
        )
    )]
    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<RestResponse> {
        let url = format!("{}{path}", self.base.as_str().trim_end_matches('/'));

        let mut request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, self.authorization()?);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status.as_u16());

        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(RestResponse { status, body })
    }
}

/// Send a request and decode a successful body into `T`.
async fn call<T: DeserializeOwned>(
    rest: &dyn Rest,
    method: Method,
    path: String,
    body: Option<Value>,
) -> Result<T> {
    let response = rest.send_request(method.clone(), &path, body).await?;

    if !response.status.is_success() {
        let message = match response.body.get("message").and_then(Value::as_str) {
            Some(message) => message.to_owned(),
            None => response.body.to_string(),
        };

        #[cfg(feature = "tracing")]
        tracing::error!(
            status = %response.status,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(response.status, method, path, message));
    }

    deserialize_with_warnings(response.body)
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: Url,
}

/// `GET /gateway`: the URL clients should open the socket on.
pub async fn get_gateway(rest: &dyn Rest) -> Result<Url> {
    let gateway: GatewayResponse = call(rest, Method::GET, "/gateway".to_owned(), None).await?;
    Ok(gateway.url)
}

pub async fn get_channel(rest: &dyn Rest, id: Snowflake) -> Result<ChannelPacket> {
    call(rest, Method::GET, format!("/channels/{id}"), None).await
}

pub async fn get_user(rest: &dyn Rest, id: Snowflake) -> Result<UserPacket> {
    call(rest, Method::GET, format!("/users/{id}"), None).await
}

/// Channel history, newest first, filtered by `request`.
pub async fn get_messages(
    rest: &dyn Rest,
    channel_id: Snowflake,
    request: &MessagesRequest,
) -> Result<Vec<MessagePacket>> {
    let path = format!("/channels/{channel_id}/messages{}", request.query_params());
    call(rest, Method::GET, path, None).await
}

pub async fn create_message(
    rest: &dyn Rest,
    channel_id: Snowflake,
    content: &str,
) -> Result<MessagePacket> {
    call(
        rest,
        Method::POST,
        format!("/channels/{channel_id}/messages"),
        Some(json!({ "content": content })),
    )
    .await
}

/// Query for [`get_messages`]. At most one of `before`, `after` and `around`
/// is honored by the server.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Builder)]
pub struct MessagesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub around: Option<Snowflake>,
}
