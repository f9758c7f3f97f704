use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use supply_watchbot::config;
use supply_watchbot::pipeline::{Dispatcher, Pipeline, PipelineSettings};
use supply_watchbot::server;
use supply_watchbot::slack::{MessageSink, SlackWebhook};
use supply_watchbot::store::auth::ServiceAccountAuth;
use supply_watchbot::store::firebase::FirebaseStore;
use supply_watchbot::store::RemoteStore;
use supply_watchbot::watch::Watcher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cfg = config::load()?;
    let timeout = cfg.remote_timeout();

    let auth = ServiceAccountAuth::new(&cfg.firebase.service_account, timeout)?;
    let store: Arc<dyn RemoteStore> =
        Arc::new(FirebaseStore::new(&cfg.firebase.database_url, Some(auth), timeout)?);
    let sink: Arc<dyn MessageSink> = Arc::new(SlackWebhook::new(&cfg.slack.webhook_url, timeout)?);

    let settings = PipelineSettings::from_config(&cfg);
    let collection = settings.collection.clone();
    let pipeline = Arc::new(Pipeline::new(store.clone(), sink, settings));

    // Feed → dispatcher → one worker per record.
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(Dispatcher::new(pipeline).run(rx));
    tokio::spawn(async move {
        if let Err(err) = Watcher::new(store, collection, tx).run().await {
            error!(?err, "watcher stopped");
        }
    });

    info!(
        project_id = %cfg.firebase.service_account.project_id,
        cooldown_minutes = cfg.slack.cooldown_minutes,
        "starting supply watchbot"
    );
    server::serve(cfg.server.port, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await
}
