#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use supply_watchbot::pipeline::{Outcome, PipelineSettings};
use supply_watchbot::slack::{MessageSink, SlackMessage};
use supply_watchbot::store::memory::MemoryStore;
use tokio::sync::{mpsc, Mutex};

pub const COLLECTION: &str = "roomSupplies";

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        collection: COLLECTION.into(),
        rooms: "rooms".into(),
        supplies: "supplies".into(),
        cooldown: chrono::Duration::minutes(5),
        icon_url: Some("https://example.com/icon.png".into()),
        timeout: Duration::from_secs(1),
    }
}

/// Kitchen / Paper Towels fixtures.
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.set("/rooms/r1", json!({ "name": "Kitchen" }));
    store.set("/rooms/r2", json!({ "name": "Lobby" }));
    store.set("/supplies/s1", json!({ "name": "Paper Towels" }));
    store.set(
        "/supplies/s2",
        json!({ "name": "Coffee", "imageUrl": "https://cdn.example.com/coffee.png" }),
    );
    store
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    sent: Arc<Mutex<Vec<SlackMessage>>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub async fn sent(&self) -> Vec<SlackMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(&self, message: &SlackMessage) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.responses.lock().await.pop_front().unwrap_or(Ok(()));
        if response.is_ok() {
            self.sent.lock().await.push(message.clone());
        }
        response
    }
}

pub fn slack_down() -> Result<()> {
    Err(anyhow!("slack error 500 Internal Server Error: boom"))
}

pub async fn next_outcome(
    rx: &mut mpsc::UnboundedReceiver<(String, Outcome)>,
) -> (String, Outcome) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an outcome")
        .expect("outcome channel closed")
}

pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<(String, Outcome)>) {
    if let Ok(Some(extra)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected outcome: {extra:?}");
    }
}
