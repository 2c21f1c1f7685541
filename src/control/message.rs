//! Control message codec.
//!
//! ```text
//! [type: u8] then per field: [len: u32 LE][bytes]
//! ```

use bytes::{BufMut, BytesMut};

use crate::common::{ByteCursor, Result, VaultError};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    DatasetRequest = 1,
    SnapshotPull = 2,
    ResultPush = 3,
    AuditLog = 4,
    ErrorLog = 255,
}

impl MessageType {
    /// Log messages are fire-and-forget and never answered.
    pub fn expects_reply(self) -> bool {
        !matches!(self, MessageType::AuditLog | MessageType::ErrorLog)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = VaultError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::DatasetRequest),
            2 => Ok(MessageType::SnapshotPull),
            3 => Ok(MessageType::ResultPush),
            4 => Ok(MessageType::AuditLog),
            255 => Ok(MessageType::ErrorLog),
            other => Err(VaultError::parse(format!("unknown control message type {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub user: String,
    pub component: String,
    pub endpoint: String,
    pub request_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub user: String,
    pub component: String,
    pub context: String,
    pub values: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Payload of a container, whole (`column` empty) or a single column.
    DatasetRequest { location: String, column: String },
    /// Verbatim bytes of a snapshot file.
    SnapshotPull { location: String },
    ResultPush { id: String, blob: Vec<u8> },
    AuditLog(AuditRecord),
    ErrorLog(ErrorRecord),
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::DatasetRequest { .. } => MessageType::DatasetRequest,
            ControlMessage::SnapshotPull { .. } => MessageType::SnapshotPull,
            ControlMessage::ResultPush { .. } => MessageType::ResultPush,
            ControlMessage::AuditLog(_) => MessageType::AuditLog,
            ControlMessage::ErrorLog(_) => MessageType::ErrorLog,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let kind = MessageType::try_from(cursor.read_u8()?)?;

        let message = match kind {
            MessageType::DatasetRequest => ControlMessage::DatasetRequest {
                location: cursor.read_len_prefixed_str()?,
                column: cursor.read_len_prefixed_str()?,
            },
            MessageType::SnapshotPull => ControlMessage::SnapshotPull {
                location: cursor.read_len_prefixed_str()?,
            },
            MessageType::ResultPush => ControlMessage::ResultPush {
                id: cursor.read_len_prefixed_str()?,
                blob: cursor.read_len_prefixed()?.to_vec(),
            },
            MessageType::AuditLog => ControlMessage::AuditLog(AuditRecord {
                user: cursor.read_len_prefixed_str()?,
                component: cursor.read_len_prefixed_str()?,
                endpoint: cursor.read_len_prefixed_str()?,
                request_type: cursor.read_len_prefixed_str()?,
            }),
            MessageType::ErrorLog => ControlMessage::ErrorLog(ErrorRecord {
                user: cursor.read_len_prefixed_str()?,
                component: cursor.read_len_prefixed_str()?,
                context: cursor.read_len_prefixed_str()?,
                values: cursor.read_len_prefixed_str()?,
                error: cursor.read_len_prefixed_str()?,
            }),
        };

        if cursor.remaining() != 0 {
            return Err(VaultError::parse(format!(
                "{} trailing bytes after {:?} message",
                cursor.remaining(),
                kind
            )));
        }
        Ok(message)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        out.put_u8(self.message_type() as u8);
        match self {
            ControlMessage::DatasetRequest { location, column } => {
                put_field(&mut out, location.as_bytes());
                put_field(&mut out, column.as_bytes());
            }
            ControlMessage::SnapshotPull { location } => put_field(&mut out, location.as_bytes()),
            ControlMessage::ResultPush { id, blob } => {
                put_field(&mut out, id.as_bytes());
                put_field(&mut out, blob);
            }
            ControlMessage::AuditLog(record) => {
                for field in [
                    &record.user,
                    &record.component,
                    &record.endpoint,
                    &record.request_type,
                ] {
                    put_field(&mut out, field.as_bytes());
                }
            }
            ControlMessage::ErrorLog(record) => {
                for field in [
                    &record.user,
                    &record.component,
                    &record.context,
                    &record.values,
                    &record.error,
                ] {
                    put_field(&mut out, field.as_bytes());
                }
            }
        }
        out.to_vec()
    }
}

fn put_field(out: &mut BytesMut, bytes: &[u8]) {
    out.put_u32_le(bytes.len() as u32);
    out.put_slice(bytes);
}
