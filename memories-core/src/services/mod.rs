//! Service modules for memory curation
//!
//! - `music_api` / `response_parser`: remote music service requests
//! - `library`: on-device library seam
//! - `aggregation`: candidate track merging
//! - `dynamic_refresh`: periodic recomputation of dynamic Memories

pub mod aggregation;
pub mod dynamic_refresh;
pub mod library;
pub mod music_api;
pub mod response_parser;

pub use aggregation::{AggregationEngine, AggregationReport};
pub use dynamic_refresh::DynamicRefresher;
pub use library::{LibraryQuery, StaticLibrary};
pub use music_api::{MusicApiClient, Query, RequestError, Source, TrackSource};
pub use response_parser::parse_envelope;
