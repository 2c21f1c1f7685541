//! In-flight uploads: pre-allocated staging files addressed by file id and
//! filled by positioned, possibly out-of-order writes.

pub mod registry;

pub use registry::{UploadRegistry, UploadSlot};
