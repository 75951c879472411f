//! Serde helpers for lenient REST decoding and secret serialization.
//!
//! With the `tracing` feature, [`deserialize_with_warnings`] reports every field
//! the target type ignores, which is how new API fields get noticed.

use secrecy::{ExposeSecret as _, SecretString};
use serde::Serializer;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Serialize a [`SecretString`] as its plain value.
///
/// Only frames that must carry the token on the wire (`Identify`, `Resume`) use this.
pub(crate) fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// Decode a REST body into `T`, logging ignored fields instead of failing on them.
///
/// On failure the offending path and the value found there are logged at `error`
/// before the error is returned.
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "Decoding response body");

    let original = value.clone();
    let mut ignored: Vec<String> = Vec::new();

    let decoded: T = serde_ignored::deserialize(value, |path| ignored.push(path.to_string()))
        .inspect_err(|_| {
            let text = original.to_string();
            let de = &mut serde_json::Deserializer::from_str(&text);
            let traced: Result<T, _> = serde_path_to_error::deserialize(de);
            if let Err(e) = traced {
                let path = e.path().to_string();
                tracing::error!(
                    type_name = %type_name::<T>(),
                    %path,
                    value = %format_value(lookup_value(&original, &path)),
                    error = %e.inner(),
                    "Response body does not match its type"
                );
            }
        })?;

    for path in ignored {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %format_value(lookup_value(&original, &path)),
            "Unknown field in response body"
        );
    }

    Ok(decoded)
}

#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Find the value at a `serde_ignored` / `serde_path_to_error` path.
///
/// `?` segments (option wrappers) are skipped; array indices may be written as
/// `members.0` or `members[0]`.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let mut current = value;

    for segment in path_segments(path) {
        if segment.is_empty() || segment == "?" {
            continue;
        }

        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// `"members[15].user"` → `["members", "15", "user"]`
#[cfg(feature = "tracing")]
fn path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut chars = path.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '.' | ']' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    current.push(inner);
                }
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

#[cfg(feature = "tracing")]
fn format_value(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
