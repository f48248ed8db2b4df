//! Read-it-later source adapter: response decoding and the HTTP client.
//!
//! The service encodes the item collection as a mapping keyed by item id, except when there
//! are no items, where it sends an empty array instead. [`decode_retrieve_response`] accepts
//! exactly that degenerate form and rejects every other non-mapping payload.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::contract::{Item, RetrieveOptions, RetrieveResponse, Source};
use crate::error::SourceError;

pub const DEFAULT_BASE_URL: &str = "https://getpocket.com";

/// Application key plus user token for the source API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocketAuth {
    pub consumer_key: String,
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    list: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    since: i64,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default, deserialize_with = "null_as_default")]
    item_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    given_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    resolved_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    sort_id: i64,
}

/// `null` decodes like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a retrieve response body.
///
/// `list` as a mapping yields its items; an empty array, `null` or a missing `list` yields no
/// items; anything else is [`SourceError::Decoding`].
pub fn decode_retrieve_response(body: &[u8]) -> Result<RetrieveResponse, SourceError> {
    let raw: RawResponse =
        serde_json::from_slice(body).map_err(|e| SourceError::Decoding(e.to_string()))?;

    let items = match raw.list {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| {
                let item: RawItem = serde_json::from_value(value)
                    .map_err(|e| SourceError::Decoding(format!("item {key}: {e}")))?;
                Ok(Item {
                    id: if item.item_id.is_empty() { key } else { item.item_id },
                    given_url: item.given_url,
                    resolved_url: item.resolved_url,
                    sort_key: item.sort_id,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?,
        Value::Array(entries) if entries.is_empty() => Vec::new(),
        Value::Null => Vec::new(),
        other => {
            return Err(SourceError::Decoding(format!(
                "unexpected json type for list: {}",
                json_kind(&other)
            )))
        }
    };

    Ok(RetrieveResponse {
        items,
        since: raw.since,
    })
}

#[derive(Serialize)]
struct RetrievePayload<'a> {
    #[serde(flatten)]
    auth: &'a PocketAuth,
    #[serde(flatten)]
    options: &'a RetrieveOptions,
}

/// HTTP client for the source's `/v3/get` endpoint.
pub struct PocketClient {
    http: reqwest::Client,
    base_url: String,
    auth: PocketAuth,
}

impl PocketClient {
    pub fn new(auth: PocketAuth) -> Self {
        Self::with_base_url(auth, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(auth: PocketAuth, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }
}

#[async_trait]
impl Source for PocketClient {
    async fn retrieve(&self, options: &RetrieveOptions) -> Result<RetrieveResponse, SourceError> {
        let url = format!("{}/v3/get", self.base_url);
        trace!(url = %url, since = options.since, "retrieving items");
        let payload = RetrievePayload {
            auth: &self.auth,
            options,
        };
        let resp = self
            .http
            .post(&url)
            .header("X-Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let message = resp
                .headers()
                .get("X-Error")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            return Err(SourceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        let decoded = decode_retrieve_response(&body)?;
        debug!(
            items = decoded.items.len(),
            since = decoded.since,
            "retrieve response decoded"
        );
        Ok(decoded)
    }
}
