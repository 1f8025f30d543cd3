//! TankDB: a shared-memory vector store
//!
//! Vector rows and their metadata live in named shared-memory regions so
//! that multiple processes on one host can operate on the same tank without
//! copies. A single store process owns the command channel and persistence;
//! peers attach to existing regions or drive the store over the mailbox.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │        /tanks, /tanks/:name/search, /tanks/:name/save       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            TankStore (registry + command loop)              │
//! │     restores records on start, polls the shared mailbox     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Tank (per-name mutex)                       │
//! │   "{name}_vector" f32 buffer  │  "{name}_meta" registry     │
//! │          shared-memory regions (mmap under /dev/shm)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod channel;
pub mod error;
pub mod region;
pub mod registry;
pub mod server;
pub mod similarity;
pub mod snapshot;
pub mod store;
pub mod tank;

pub use channel::{Command, CommandChannel, DEFAULT_CHANNEL_NAME};
pub use error::{Result, TankError};
pub use similarity::SimMethod;
pub use store::TankStore;
pub use tank::{MetadataFilter, SearchHit, Tank, TankConfig};
