//! Room and supply lookups for a room-supply record.
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::model::{Room, Supply};
use crate::store::{child_path, is_valid_key, RemoteStore};

#[derive(Clone)]
pub struct JoinResolver {
    store: Arc<dyn RemoteStore>,
    rooms: String,
    supplies: String,
    timeout: Duration,
}

impl JoinResolver {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        rooms: impl Into<String>,
        supplies: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            rooms: rooms.into(),
            supplies: supplies.into(),
            timeout,
        }
    }

    /// Fetch both entities concurrently. Either may be absent; a read error
    /// or timeout on either side fails the whole resolution.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        room_id: &str,
        supply_id: &str,
    ) -> Result<(Option<Room>, Option<Supply>)> {
        tokio::try_join!(
            self.read_entity::<Room>(&self.rooms, room_id),
            self.read_entity::<Supply>(&self.supplies, supply_id),
        )
    }

    async fn read_entity<T: DeserializeOwned>(&self, parent: &str, id: &str) -> Result<Option<T>> {
        if !is_valid_key(id) {
            return Ok(None);
        }
        let path = child_path(parent, id);
        let value = bounded(self.timeout, &path, self.store.read_once(&path)).await?;
        value
            .map(|v| {
                serde_json::from_value(v).with_context(|| format!("malformed entity at {path}"))
            })
            .transpose()
    }
}

/// Run a remote operation with a deadline; hitting it is an error like any other.
pub async fn bounded<T>(
    limit: Duration,
    what: &str,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| anyhow!("{what} timed out after {limit:?}"))?
}
