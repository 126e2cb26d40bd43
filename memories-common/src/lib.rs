//! # Memories Common Library
//!
//! Shared code for the Memories crates including:
//! - Domain models (Memory, MemoryItem, UpdateSettings, TrackItem)
//! - Event types and the EventBus
//! - Configuration loading
//! - Logging initialisation
//! - SQLite initialisation and key/value settings

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{DateRange, Image, Memory, MemoryItem, TrackRef, UpdateSettings};
