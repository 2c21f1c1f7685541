use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

/// Failure taxonomy shared by every layer of the vault.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("failed to allocate {size} bytes for '{}': {source}", path.display())]
    Allocation {
        path: PathBuf,
        size: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported container kind {0}")]
    UnsupportedKind(u8),
    #[error("access of {len} bytes at offset {offset} exceeds limit {limit}")]
    OutOfBounds { offset: u64, len: u64, limit: u64 },
    #[error("upload '{0}' is already registered")]
    DuplicateId(String),
    #[error("upload '{0}' is not registered")]
    UnknownId(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("split ratio {0} is outside [0, 1]")]
    InvalidRatio(f32),
}

impl VaultError {
    pub fn parse(msg: impl Into<String>) -> Self {
        VaultError::Parse(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        VaultError::NotFound(what.into())
    }

    /// Short stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Allocation { .. } => "allocation",
            VaultError::UnsupportedKind(_) => "unsupported_kind",
            VaultError::OutOfBounds { .. } => "out_of_bounds",
            VaultError::DuplicateId(_) => "duplicate_id",
            VaultError::UnknownId(_) => "unknown_id",
            VaultError::Parse(_) => "parse",
            VaultError::Io(_) => "io",
            VaultError::NotFound(_) => "not_found",
            VaultError::InvalidRatio(_) => "invalid_ratio",
        }
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(err: base64::DecodeError) -> Self {
        VaultError::Parse(format!("invalid base64 payload: {}", err))
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Parse(format!("invalid json: {}", err))
    }
}

/// Rejects ids that would escape the directory they are joined onto.
pub fn validate_component(id: &str) -> Result<()> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(VaultError::parse(format!("invalid identifier '{}'", id)));
    }
    Ok(())
}
