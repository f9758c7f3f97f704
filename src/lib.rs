//! Watches room-supply requests in a Firebase Realtime Database and announces
//! them in Slack, at most once per cooldown window per record.

pub mod config;
pub mod gate;
pub mod humanize;
pub mod model;
pub mod pipeline;
pub mod resolve;
pub mod server;
pub mod slack;
pub mod store;
pub mod watch;
