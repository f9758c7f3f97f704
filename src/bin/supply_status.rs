use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use std::sync::Arc;

use supply_watchbot::config;
use supply_watchbot::gate;
use supply_watchbot::humanize::time_ago;
use supply_watchbot::model::RoomSupply;
use supply_watchbot::resolve::JoinResolver;
use supply_watchbot::store::auth::ServiceAccountAuth;
use supply_watchbot::store::firebase::FirebaseStore;
use supply_watchbot::store::RemoteStore;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print every room supply and whether a notification is currently due"
)]
struct Args {
    /// Print one JSON object per record instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load()?;
    let timeout = cfg.remote_timeout();
    let auth = ServiceAccountAuth::new(&cfg.firebase.service_account, timeout)?;
    let store: Arc<dyn RemoteStore> =
        Arc::new(FirebaseStore::new(&cfg.firebase.database_url, Some(auth), timeout)?);
    let resolver = JoinResolver::new(
        store.clone(),
        cfg.firebase.paths.rooms.clone(),
        cfg.firebase.paths.supplies.clone(),
        timeout,
    );

    let collection = &cfg.firebase.paths.room_supplies;
    let Some(all) = store.read_once(collection).await? else {
        println!("No room supplies under {collection}");
        return Ok(());
    };
    let records = all
        .as_object()
        .with_context(|| format!("{collection} is not a collection"))?;

    let now = Utc::now();
    let cooldown = cfg.cooldown();
    for (id, value) in records {
        let record: RoomSupply = match serde_json::from_value(value.clone()) {
            Ok(record) => record,
            Err(err) => {
                eprintln!("{id}: malformed ({err})");
                continue;
            }
        };
        let (room, supply) = resolver.resolve(&record.room, &record.supply).await?;
        let room_name = room.map(|r| r.name).unwrap_or_else(|| format!("<{}>", record.room));
        let supply_name = supply.map(|s| s.name).unwrap_or_else(|| format!("<{}>", record.supply));
        let due = gate::is_due(record.requested, record.notified, cooldown, now);
        let requested = record.requested.map(|t| time_ago(gate::display_time(t, now), now));
        let notified = record.notified.map(|t| time_ago(gate::display_time(t, now), now));

        if args.json {
            println!(
                "{}",
                json!({
                    "id": id,
                    "room": room_name,
                    "supply": supply_name,
                    "requested": record.requested.map(|t| t.timestamp_millis()),
                    "notified": record.notified.map(|t| t.timestamp_millis()),
                    "due": due,
                })
            );
        } else {
            println!(
                "{id:<24} {supply_name} in {room_name}: requested {}, notified {}{}",
                requested.as_deref().unwrap_or("never"),
                notified.as_deref().unwrap_or("never"),
                if due { " [DUE]" } else { "" }
            );
        }
    }
    Ok(())
}
