//! Tracker Studio backend
//!
//! Permission resolution, enforcement, and the generic tracker engine
//! (templates, schema snapshots, entries, reminders, sharing) for a
//! personal life-management application.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod fields;
pub mod services;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging for embedders and binaries
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_studio=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
