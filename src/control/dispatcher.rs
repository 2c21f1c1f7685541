use std::fs;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use super::log_sink::{LogKind, LogSink};
use super::message::{AuditRecord, ControlMessage, ErrorRecord, MessageType};
use super::results::ResultStore;
use crate::common::Result;
use crate::container::{encode_values, DatasetFile};
use crate::session::Session;

/// Reply to a request that could not be decoded or served.
pub const FAILURE_TOKEN: &[u8] = b"-";
pub const RESULT_STORED: &[u8] = b"success";
pub const RESULT_FAILED: &[u8] = b"fail";

/// Answers tagged request messages and records log messages. Holds no
/// per-call state.
pub struct ControlDispatcher {
    results: ResultStore,
    log_sink: Arc<dyn LogSink>,
}

impl ControlDispatcher {
    pub fn new(results: ResultStore, log_sink: Arc<dyn LogSink>) -> Self {
        Self { results, log_sink }
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Decodes and serves one message; sends the reply (if any) on `session`.
    pub fn handle(&self, session: &dyn Session, data: &[u8]) -> Result<()> {
        match self.process(data) {
            Some(reply) => session.send_response(&reply),
            None => Ok(()),
        }
    }

    /// Computes the reply for one message. Log messages yield `None`.
    #[instrument(skip_all, fields(len = data.len()))]
    pub fn process(&self, data: &[u8]) -> Option<Vec<u8>> {
        let message = match ControlMessage::decode(data) {
            Ok(message) => message,
            Err(e) => return self.reject(data, e.to_string()),
        };

        match message {
            ControlMessage::DatasetRequest { location, column } => {
                Some(self.dataset_request(&location, &column))
            }
            ControlMessage::SnapshotPull { location } => Some(self.snapshot_pull(&location)),
            ControlMessage::ResultPush { id, blob } => Some(self.result_push(&id, &blob)),
            ControlMessage::AuditLog(record) => {
                self.audit_log(&record);
                None
            }
            ControlMessage::ErrorLog(record) => {
                self.error_log(&record);
                None
            }
        }
    }

    fn reject(&self, data: &[u8], reason: String) -> Option<Vec<u8>> {
        let kind = data.first().and_then(|&b| MessageType::try_from(b).ok());
        match kind {
            Some(kind) if !kind.expects_reply() => {
                error!(?kind, %reason, "broken log message");
                None
            }
            _ => {
                error!(?kind, %reason, "broken control message");
                Some(FAILURE_TOKEN.to_vec())
            }
        }
    }

    fn dataset_request(&self, location: &str, column: &str) -> Vec<u8> {
        let payload = DatasetFile::open(location).and_then(|file| {
            if column.is_empty() {
                file.payload()
            } else {
                file.column(column).map(|values| encode_values(&values))
            }
        });

        match payload {
            Ok(bytes) => {
                debug!(location, column, len = bytes.len(), "dataset served");
                bytes
            }
            Err(e) => {
                error!(location, column, kind = e.kind(), error = %e, "dataset request failed");
                FAILURE_TOKEN.to_vec()
            }
        }
    }

    fn snapshot_pull(&self, location: &str) -> Vec<u8> {
        match fs::read(location) {
            Ok(bytes) => {
                debug!(location, len = bytes.len(), "snapshot served");
                bytes
            }
            Err(e) => {
                error!(location, error = %e, "snapshot pull failed");
                FAILURE_TOKEN.to_vec()
            }
        }
    }

    fn result_push(&self, id: &str, blob: &[u8]) -> Vec<u8> {
        match self.results.write(id, blob) {
            Ok(()) => RESULT_STORED.to_vec(),
            Err(e) => {
                error!(id, kind = e.kind(), error = %e, "storing result failed");
                RESULT_FAILED.to_vec()
            }
        }
    }

    fn audit_log(&self, record: &AuditRecord) {
        let fields = [
            ("component", record.component.as_str()),
            ("endpoint", record.endpoint.as_str()),
            ("type", record.request_type.as_str()),
        ];
        if let Err(e) = self.log_sink.append(LogKind::Audit, &record.user, &fields) {
            warn!(user = %record.user, error = %e, "audit log append failed");
        }
    }

    fn error_log(&self, record: &ErrorRecord) {
        let mut fields = vec![("component", record.component.as_str())];
        if !record.context.is_empty() {
            fields.push(("context", record.context.as_str()));
        }
        if !record.values.is_empty() {
            fields.push(("values", record.values.as_str()));
        }
        fields.push(("error", record.error.as_str()));

        if let Err(e) = self.log_sink.append(LogKind::Error, &record.user, &fields) {
            warn!(user = %record.user, error = %e, "error log append failed");
        }
    }
}
