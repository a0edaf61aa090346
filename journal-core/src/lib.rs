pub mod assets;
pub mod codec;
pub mod config;
pub mod crdt;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod keys;
pub mod network;
pub mod queue;
pub mod retry;
pub mod store;
pub mod sync_client;
pub mod sync_manager;
pub mod tokens;
pub mod wire;

pub use entry::{Block, BlockKind, Entry, EntryType, SyncStatus};
pub use error::{ErrorKind, SyncError};
