//! Companion device synchronization

pub mod channel;
pub mod coordinator;
pub mod messages;

pub use channel::{ChannelError, LoopbackChannel, MessageChannel};
pub use coordinator::{ApplyOutcome, SyncCoordinator, SyncError};
pub use messages::{SyncMessage, TransferSetting};
