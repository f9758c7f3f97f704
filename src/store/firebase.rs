//! Firebase Realtime Database over its REST API.
//!
//! Reads and writes are plain `GET`/`PATCH` on `<db>/<path>.json`.
//! Subscriptions use the streaming endpoint: a long-lived `GET` with
//! `Accept: text/event-stream` that sends `put`/`patch` events relative to
//! the subscribed path. Each subscription keeps its own copy of the tree and
//! reports the result after every event.
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::resolve::bounded;

use super::auth::ServiceAccountAuth;
use super::sse::{SseDecoder, SseEvent};
use super::{tree, ChildStream, RemoteStore, StoreError, ValueStream};

#[derive(Clone)]
pub struct FirebaseStore {
    http: Client,
    base_url: Url,
    auth: Option<Arc<ServiceAccountAuth>>,
    timeout: Duration,
}

impl fmt::Debug for FirebaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Change carried by a stream event, relative to the subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put { path: String, data: Value },
    Patch { path: String, data: Map<String, Value> },
}

#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

impl FirebaseStore {
    /// `auth` may be `None` for databases with public rules or an emulator.
    pub fn new(
        database_url: &str,
        auth: Option<ServiceAccountAuth>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut raw = database_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).context("invalid Firebase database URL")?;
        let http = Client::builder()
            .user_agent("supply-watchbot/0.1")
            .connect_timeout(timeout)
            .build()
            .context("failed to build Firebase client")?;
        Ok(Self {
            http,
            base_url,
            auth: auth.map(Arc::new),
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let trimmed = path.trim_matches('/');
        let resource = if trimmed.is_empty() {
            ".json".to_string()
        } else {
            format!("{trimmed}.json")
        };
        self.base_url
            .join(&resource)
            .with_context(|| format!("invalid store path {path:?}"))
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut req = self.http.request(method, self.url(path)?);
        if let Some(auth) = &self.auth {
            // Query parameter rather than header: it survives the stream redirect.
            let token = auth.access_token().await?;
            req = req.query(&[("access_token", token)]);
        }
        Ok(req)
    }

    async fn open_stream(&self, path: &str) -> Result<BoxStream<'static, Result<SseEvent>>> {
        // Only the opening response is bounded; the stream itself lives on.
        let open = async {
            let res = self
                .request(Method::GET, path)
                .await?
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .with_context(|| format!("failed to open event stream for {path}"))?;
            check_status(res).await
        };
        let what = format!("opening event stream for {path}");
        let res = bounded(self.timeout, &what, open).await?;
        info!(path, "event stream opened");

        let mut decoder = SseDecoder::default();
        let events = res
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(err) => vec![Err(anyhow::Error::new(err).context("event stream interrupted"))],
            })
            .flat_map(stream::iter);
        Ok(events.boxed())
    }
}

async fn check_status(res: Response) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    warn!(status, %body, "Firebase request failed");
    Err(StoreError::Status { status, body }.into())
}

/// Interpret one stream event. `Ok(None)` for events that carry no change.
pub fn parse_event(event: &SseEvent) -> Result<Option<Change>, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        event: event.event.clone(),
        reason,
    };
    match event.event.as_str() {
        "put" | "patch" => {
            let payload: StreamPayload =
                serde_json::from_str(&event.data).map_err(|e| malformed(e.to_string()))?;
            if event.event == "put" {
                return Ok(Some(Change::Put {
                    path: payload.path,
                    data: payload.data,
                }));
            }
            match payload.data {
                Value::Object(data) => Ok(Some(Change::Patch {
                    path: payload.path,
                    data,
                })),
                other => Err(malformed(format!("patch data must be an object, got {other}"))),
            }
        }
        "keep-alive" => Ok(None),
        "cancel" => Err(StoreError::Cancelled(event.data.clone())),
        "auth_revoked" => Err(StoreError::AuthRevoked),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            Ok(None)
        }
    }
}

/// Apply a change to a subscription's local tree.
pub fn apply(root: &mut Value, change: Change) {
    match change {
        Change::Put { path, data } => tree::set(root, &path, data),
        Change::Patch { path, data } => tree::merge(root, &path, data),
    }
}

/// Keys of `root` not yet in `seen`, in the tree's order. Marks them seen.
fn new_children(root: &Value, seen: &mut HashSet<String>) -> Vec<String> {
    let Some(map) = root.as_object() else {
        return Vec::new();
    };
    map.keys()
        .filter(|key| seen.insert((*key).clone()))
        .cloned()
        .collect()
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn subscribe_children(&self, path: &str) -> Result<ChildStream> {
        let events = self.open_stream(path).await?;
        let mut root = Value::Null;
        let mut seen = HashSet::new();
        let keys = events
            .map(move |event| -> Vec<Result<String>> {
                let change = match event.and_then(|ev| parse_event(&ev).map_err(Into::into)) {
                    Ok(Some(change)) => change,
                    Ok(None) => return Vec::new(),
                    Err(err) => return vec![Err(err)],
                };
                apply(&mut root, change);
                new_children(&root, &mut seen).into_iter().map(Ok).collect()
            })
            .flat_map(stream::iter);
        Ok(keys.boxed())
    }

    async fn subscribe_value(&self, path: &str) -> Result<ValueStream> {
        let events = self.open_stream(path).await?;
        let mut root = Value::Null;
        let values = events.filter_map(move |event| {
            let item = match event.and_then(|ev| parse_event(&ev).map_err(Into::into)) {
                Ok(Some(change)) => {
                    apply(&mut root, change);
                    Some(Ok((!root.is_null()).then(|| root.clone())))
                }
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            };
            futures::future::ready(item)
        });
        Ok(values.boxed())
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        let res = self
            .request(Method::GET, path)
            .await?
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("failed to read {path}"))?;
        let res = check_status(res).await?;
        let value: Value = res.json().await.context("invalid JSON from Firebase")?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let res = self
            .request(Method::PATCH, path)
            .await?
            .timeout(self.timeout)
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("failed to update {path}"))?;
        check_status(res).await?;
        Ok(())
    }
}
