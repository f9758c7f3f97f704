//! The debounce-and-notify pipeline.
//!
//! Each observed mutation of a room-supply record runs through:
//! gate → resolve room and supply → deliver to Slack → write `notified`.
//!
//! Delivery happens before the acknowledgment write, so delivery is
//! at-least-once: a crash between the two can repeat one message after a
//! restart.
//!
//! Until the acknowledgment shows up in the feed, the worker gates against
//! its own record of the delivery (see [`RecordState`]). That covers
//! snapshots queued while a send was in flight and requests that follow a
//! failed acknowledgment.
//!
//! The acknowledgment write is itself a mutation of the watched record and
//! comes back through the feed. That echo carries the new `notified` and the
//! gate turns it away. Records are handled by one sequential worker each
//! (see [`Dispatcher`]), so the echo is always evaluated after the write that
//! caused it.
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::gate;
use crate::model::{RecordEvent, RoomSupply};
use crate::resolve::{bounded, JoinResolver};
use crate::slack::{self, MessageSink, SlackMessage};
use crate::store::{child_path, server_timestamp, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub collection: String,
    pub rooms: String,
    pub supplies: String,
    pub cooldown: chrono::Duration,
    pub icon_url: Option<String>,
    pub timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            collection: cfg.firebase.paths.room_supplies.clone(),
            rooms: cfg.firebase.paths.rooms.clone(),
            supplies: cfg.firebase.paths.supplies.clone(),
            cooldown: cfg.cooldown(),
            icon_url: cfg.slack.icon_url.clone(),
            timeout: cfg.remote_timeout(),
        }
    }
}

/// What happened to one observed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Gate closed: nothing outstanding, or still inside the cooldown.
    NotDue,
    /// Due by the record alone, but a delivery this worker made is not yet
    /// reflected in `notified`.
    Suppressed,
    /// Room or supply does not exist.
    Missing,
    ResolveFailed,
    DeliveryFailed,
    Delivered { acked: bool },
}

/// Per-record memory kept by its worker.
#[derive(Debug, Default, Clone)]
pub struct RecordState {
    delivery: Option<Delivery>,
}

#[derive(Debug, Clone)]
struct Delivery {
    at: DateTime<Utc>,
    /// `notified` as the record showed it when we sent.
    notified_before: Option<DateTime<Utc>>,
}

impl RecordState {
    /// Notification time to gate against, given the record's own `notified`.
    /// Forgets the delivery once the record's `notified` has moved on.
    fn effective_notified(&mut self, notified: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self
            .delivery
            .as_ref()
            .is_some_and(|delivery| delivery.notified_before != notified)
        {
            self.delivery = None;
        }
        match &self.delivery {
            Some(delivery) => Some(notified.map_or(delivery.at, |n| n.max(delivery.at))),
            None => notified,
        }
    }
}

pub struct Pipeline {
    store: Arc<dyn RemoteStore>,
    sink: Arc<dyn MessageSink>,
    resolver: JoinResolver,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        sink: Arc<dyn MessageSink>,
        settings: PipelineSettings,
    ) -> Self {
        let resolver = JoinResolver::new(
            store.clone(),
            settings.rooms.clone(),
            settings.supplies.clone(),
            settings.timeout,
        );
        Self {
            store,
            sink,
            resolver,
            settings,
        }
    }

    /// Handle one observed state of record `id`. Never fails: every failure
    /// is logged and leaves `notified` untouched so a later mutation retries.
    #[instrument(skip_all, fields(record = %id))]
    pub async fn process(
        &self,
        id: &str,
        record: &RoomSupply,
        state: &mut RecordState,
    ) -> Outcome {
        let cooldown = self.settings.cooldown;
        let now = Utc::now();
        let requested = match record.requested {
            Some(requested) if gate::is_due(Some(requested), record.notified, cooldown, now) => {
                requested
            }
            _ => {
                debug!(requested = ?record.requested, notified = ?record.notified, "not due");
                return Outcome::NotDue;
            }
        };

        // Snapshots queued before our acknowledgment landed still show the old
        // `notified`; gate them against the delivery we already made.
        let effective = state.effective_notified(record.notified);
        if !gate::is_due(Some(requested), effective, cooldown, now) {
            debug!(%requested, ?effective, "delivered recently; awaiting acknowledgment");
            return Outcome::Suppressed;
        }

        let (room, supply) = match self.resolver.resolve(&record.room, &record.supply).await {
            Ok((Some(room), Some(supply))) => (room, supply),
            Ok((room, supply)) => {
                warn!(
                    room = %record.room,
                    supply = %record.supply,
                    room_found = room.is_some(),
                    supply_found = supply.is_some(),
                    "room or supply not found; skipping"
                );
                return Outcome::Missing;
            }
            Err(err) => {
                warn!(
                    ?err,
                    room = %record.room,
                    supply = %record.supply,
                    "failed to resolve room and supply"
                );
                return Outcome::ResolveFailed;
            }
        };

        let attachment = slack::format_attachment(&room, &supply, requested, Utc::now());
        let message = SlackMessage::new(attachment, self.settings.icon_url.clone());
        let delivery = self.sink.deliver(&message);
        if let Err(err) = bounded(self.settings.timeout, "Slack delivery", delivery).await {
            warn!(?err, "failed to deliver notification");
            return Outcome::DeliveryFailed;
        }
        state.delivery = Some(Delivery {
            at: Utc::now(),
            notified_before: record.notified,
        });
        info!(room = %room.name, supply = %supply.name, "notification delivered");

        let acked = match self.mark_notified(id).await {
            Ok(()) => true,
            Err(err) => {
                error!(?err, "failed to mark record notified");
                false
            }
        };
        Outcome::Delivered { acked }
    }

    /// Stamp the record's `notified` field with the store's clock.
    pub async fn mark_notified(&self, id: &str) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("notified".to_string(), server_timestamp());
        let path = child_path(&self.settings.collection, id);
        bounded(self.settings.timeout, &path, self.store.update(&path, fields)).await
    }
}

/// Routes record events to one sequential worker per record id.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    workers: HashMap<String, mpsc::UnboundedSender<RoomSupply>>,
    outcomes: Option<mpsc::UnboundedSender<(String, Outcome)>>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            workers: HashMap::new(),
            outcomes: None,
        }
    }

    /// Report every outcome on `tx` as `(record id, outcome)`.
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<(String, Outcome)>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<RecordEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        info!(workers = self.workers.len(), "record feed closed; dispatcher stopping");
    }

    pub fn dispatch(&mut self, event: RecordEvent) {
        let RecordEvent { id, mut record } = event;
        if let Some(tx) = self.workers.get(&id) {
            match tx.send(record) {
                Ok(()) => return,
                // Worker gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => record = returned,
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(record_worker(
            self.pipeline.clone(),
            id.clone(),
            rx,
            self.outcomes.clone(),
        ));
        let _ = tx.send(record);
        self.workers.insert(id, tx);
    }
}

async fn record_worker(
    pipeline: Arc<Pipeline>,
    id: String,
    mut rx: mpsc::UnboundedReceiver<RoomSupply>,
    outcomes: Option<mpsc::UnboundedSender<(String, Outcome)>>,
) {
    let mut state = RecordState::default();
    while let Some(record) = rx.recv().await {
        let outcome = pipeline.process(&id, &record, &mut state).await;
        if let Some(tx) = &outcomes {
            let _ = tx.send((id.clone(), outcome));
        }
    }
}
