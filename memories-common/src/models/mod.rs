//! Domain models shared by the Memories crates

mod library;
mod memory;
mod track;

pub use library::{CollectionKind, LibraryCollection, LibraryTrack};
pub use memory::{DateRange, Image, Memory, MemoryItem, TrackRef, UpdateSettings};
pub use track::{Artwork, ResourceKind, TrackItem};
