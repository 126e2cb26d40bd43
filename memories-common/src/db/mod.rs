//! Database initialisation and key/value settings

pub mod init;
pub mod settings;

pub use init::{init_database, init_in_memory_database};
