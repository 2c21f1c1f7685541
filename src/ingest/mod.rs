//! Stream channel: chunk frames in two framings, written into open uploads.

pub mod dispatcher;
pub mod frame;

pub use dispatcher::{IngestDispatcher, IngestOutcome, UploadFinishSink};
pub use frame::{normalize_base64url, Framing, IngestFrame, ID_LEN};

#[cfg(test)]
mod tests;
