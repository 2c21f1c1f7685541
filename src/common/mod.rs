pub mod config;
pub mod cursor;
pub mod error;
pub mod logging;

pub use config::{IngestConfig, OffsetWidth, StorageConfig, UploadConfig, VaultConfig};
pub use cursor::ByteCursor;
pub use error::{Result, VaultError};
