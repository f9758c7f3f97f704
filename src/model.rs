use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked (room, supply) pairing. Written by the request UI; this service
/// only ever writes `notified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSupply {
    pub room: String,
    pub supply: String,
    /// Set when someone last asked for this supply.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub requested: Option<DateTime<Utc>>,
    /// Set (by server clock) when a notification was last sent.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub notified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supply {
    pub name: String,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// One observed mutation of a room-supply record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    pub id: String,
    pub record: RoomSupply,
}
