//! Storage core for machine-learning datasets and cluster snapshots.
//!
//! Uploads arrive as chunk frames on a stream channel and are reassembled into
//! pre-allocated staging files ([`upload`], [`ingest`]). Finished uploads are
//! converted into typed dataset containers ([`container`], [`finalize`]) and
//! served back over a tagged request/response channel ([`control`]).
//! [`root::VaultRoot`] owns all of it.

pub mod common;
pub mod container;
pub mod control;
pub mod finalize;
pub mod ingest;
pub mod root;
pub mod session;
pub mod storage;
pub mod upload;

pub use common::{Result, VaultConfig, VaultError};
pub use container::{ContainerHeader, DatasetFile, DatasetKind};
pub use control::{ControlDispatcher, LogSink};
pub use ingest::{IngestDispatcher, IngestOutcome, UploadFinishSink};
pub use root::VaultRoot;
pub use session::Session;
pub use upload::UploadRegistry;
