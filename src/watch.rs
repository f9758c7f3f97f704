//! Change feed: turns store subscriptions into [`RecordEvent`]s.
//!
//! One children subscription discovers records; each record then gets its
//! own value subscription for the life of the process, so every mutation
//! (including our own `notified` writes) is forwarded.
use anyhow::Result;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::{RecordEvent, RoomSupply};
use crate::store::{child_path, RemoteStore};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

pub struct Watcher {
    store: Arc<dyn RemoteStore>,
    collection: String,
    events: mpsc::Sender<RecordEvent>,
    records: HashMap<String, JoinHandle<()>>,
    resubscribe_delay: Duration,
}

impl Watcher {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        collection: impl Into<String>,
        events: mpsc::Sender<RecordEvent>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            events,
            records: HashMap::new(),
            resubscribe_delay: RESUBSCRIBE_DELAY,
        }
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Watch until the receiving side of the event channel goes away.
    #[instrument(skip_all, fields(collection = %self.collection))]
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.store.subscribe_children(&self.collection).await {
                Ok(mut children) => {
                    info!("watching for room supplies");
                    while let Some(child) = children.next().await {
                        match child {
                            Ok(id) => self.track(id),
                            Err(err) => {
                                warn!(?err, "children subscription failed");
                                break;
                            }
                        }
                    }
                }
                Err(err) => warn!(?err, "failed to subscribe to children"),
            }
            if self.events.is_closed() {
                info!("record feed closed; watcher stopping");
                for (_, handle) in self.records.drain() {
                    handle.abort();
                }
                return Ok(());
            }
            tokio::time::sleep(self.resubscribe_delay).await;
        }
    }

    fn track(&mut self, id: String) {
        if self.records.get(&id).is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        debug!(%id, "room supply discovered");
        let handle = tokio::spawn(watch_record(
            self.store.clone(),
            child_path(&self.collection, &id),
            id.clone(),
            self.events.clone(),
            self.resubscribe_delay,
        ));
        self.records.insert(id, handle);
    }
}

async fn watch_record(
    store: Arc<dyn RemoteStore>,
    path: String,
    id: String,
    events: mpsc::Sender<RecordEvent>,
    resubscribe_delay: Duration,
) {
    loop {
        match store.subscribe_value(&path).await {
            Ok(mut values) => {
                while let Some(value) = values.next().await {
                    match value {
                        Ok(Some(value)) => match serde_json::from_value::<RoomSupply>(value) {
                            Ok(record) => {
                                let event = RecordEvent {
                                    id: id.clone(),
                                    record,
                                };
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => warn!(%id, ?err, "skipping malformed room supply"),
                        },
                        Ok(None) => debug!(%id, "room supply removed"),
                        Err(err) => {
                            warn!(%id, ?err, "value subscription failed");
                            break;
                        }
                    }
                }
            }
            Err(err) => warn!(%id, ?err, "failed to subscribe to room supply"),
        }
        if events.is_closed() {
            return;
        }
        tokio::time::sleep(resubscribe_delay).await;
    }
}
