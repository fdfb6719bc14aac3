//! # curator-core
//!
//! Core library for the curator media organizer: a staged ingestion
//! pipeline that watches download directories, waits for arriving video
//! files to stabilize, identifies them via a generative-text service,
//! enriches the identification from an external film database, and
//! publishes each file into a structured library by hardlink, symlink or
//! copy. Durable state lives in two single-file SQLite databases: the
//! processed-file ledger and the metadata-lookup cache.

pub mod database;
pub mod digest;
pub mod error;
pub mod health;
pub mod identify;
pub mod metadata;
pub mod organizer;
pub mod pending;
pub mod pipeline;
pub mod publisher;
pub mod resilience;
pub mod scan;
pub mod stats;
pub mod types;

pub use error::{CuratorError, Result};
pub use organizer::{LogLevelSetter, MediaOrganizer};
pub use types::{
    is_video_file, EnrichedRecord, FileDescriptor, MediaKind, Origin, Priority, ProvisionalIdent,
};
