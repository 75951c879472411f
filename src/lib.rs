#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod cache;
pub mod client;
pub mod error;
pub mod event;
pub mod gateway;
pub mod model;
pub mod rest;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use serde::Serialize;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable [`client::Config::from_env`] reads the bot token from.
pub const TOKEN_VAR: &str = "GATEWAY_BOT_TOKEN";

/// Trait for converting request types to URL query parameters.
///
/// This trait is automatically implemented for all types that implement [`Serialize`].
/// It uses [`serde_html_form`] to serialize the struct fields into a query string.
pub trait ToQueryParams: Serialize {
    /// Returns an empty string if no parameters are set, otherwise `?` followed
    /// by URL-encoded key-value pairs.
    fn query_params(&self) -> String {
        let params = serde_html_form::to_string(self)
            .inspect_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to convert to URL-encoded string {e:?}");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_html_form::ser::Error = e;
            })
            .unwrap_or_default();

        if params.is_empty() {
            params
        } else {
            format!("?{params}")
        }
    }
}

impl<T: Serialize> ToQueryParams for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Members {
        limit: u32,
        after: Option<types::Snowflake>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        roles: Vec<types::Snowflake>,
    }

    #[test]
    fn query_params_repeat_sequences() {
        let query = Members {
            limit: 100,
            after: None,
            roles: vec![types::Snowflake::new(1), types::Snowflake::new(2)],
        };

        assert_eq!(query.query_params(), "?limit=100&roles=1&roles=2");
    }

    #[test]
    fn empty_query_is_empty_string() {
        #[derive(Serialize)]
        struct Nothing {
            #[serde(skip_serializing_if = "Option::is_none")]
            before: Option<u64>,
        }

        assert_eq!(Nothing { before: None }.query_params(), "");
    }
}
