//! Request/response channel: dataset and snapshot reads, result pushes,
//! audit and error logs.

pub mod dispatcher;
pub mod log_sink;
pub mod message;
pub mod results;

pub use dispatcher::{ControlDispatcher, FAILURE_TOKEN, RESULT_FAILED, RESULT_STORED};
pub use log_sink::{render_table, FileLogSink, LogKind, LogSink, GENERIC_USER};
pub use message::{AuditRecord, ControlMessage, ErrorRecord, MessageType};
pub use results::ResultStore;

#[cfg(test)]
mod tests;
