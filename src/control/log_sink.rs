use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::common::error::validate_component;
use crate::common::{Result, VaultError};

/// File name used for records without a user.
pub const GENERIC_USER: &str = "generic";

const MAX_CELL_WIDTH: usize = 200;
const RECORD_SEPARATOR: &str = "\n\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Audit,
    Error,
}

/// Destination of audit and error records sent over the control channel.
pub trait LogSink: Send + Sync {
    /// Appends one record. A timestamp is added ahead of `fields`.
    fn append(&self, kind: LogKind, user: &str, fields: &[(&str, &str)]) -> Result<()>;
}

/// Appends key/value tables to `<dir>/<user>` text files.
pub struct FileLogSink {
    audit_dir: PathBuf,
    error_dir: PathBuf,
}

impl FileLogSink {
    pub fn new(audit_dir: impl Into<PathBuf>, error_dir: impl Into<PathBuf>) -> Result<Self> {
        let sink = Self {
            audit_dir: audit_dir.into(),
            error_dir: error_dir.into(),
        };
        fs::create_dir_all(&sink.audit_dir)?;
        fs::create_dir_all(&sink.error_dir)?;
        Ok(sink)
    }

    fn dir(&self, kind: LogKind) -> &Path {
        match kind {
            LogKind::Audit => &self.audit_dir,
            LogKind::Error => &self.error_dir,
        }
    }

    pub fn path_for(&self, kind: LogKind, user: &str) -> Result<PathBuf> {
        let name = if user.is_empty() { GENERIC_USER } else { user };
        validate_component(name)?;
        Ok(self.dir(kind).join(name))
    }

    /// Everything logged so far for `user`.
    pub fn read(&self, kind: LogKind, user: &str) -> Result<String> {
        let path = self.path_for(kind, user)?;
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VaultError::not_found(format!("log of '{}'", user)),
            _ => VaultError::Io(e),
        })
    }
}

impl LogSink for FileLogSink {
    fn append(&self, kind: LogKind, user: &str, fields: &[(&str, &str)]) -> Result<()> {
        let path = self.path_for(kind, user)?;
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut rows = Vec::with_capacity(fields.len() + 1);
        rows.push(("timestamp", timestamp.as_str()));
        rows.extend_from_slice(fields);

        let mut record = render_table(&rows);
        record.push_str(RECORD_SEPARATOR);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(record.as_bytes())?;
        Ok(())
    }
}

/// Renders a bordered two-column `key | value` table. Long or multi-line
/// values continue on rows with an empty key cell.
pub fn render_table(rows: &[(&str, &str)]) -> String {
    let mut lines: Vec<(String, String)> = Vec::new();
    for (key, value) in rows {
        let mut first = true;
        for chunk in wrap(value) {
            let key = if first { key.to_string() } else { String::new() };
            lines.push((key, chunk));
            first = false;
        }
    }

    let key_width = lines
        .iter()
        .map(|(k, _)| k.chars().count())
        .chain(std::iter::once("key".len()))
        .max()
        .unwrap_or(0);
    let value_width = lines
        .iter()
        .map(|(_, v)| v.chars().count())
        .chain(std::iter::once("value".len()))
        .max()
        .unwrap_or(0);

    let border = |fill: char| {
        format!(
            "+{}+{}+\n",
            fill.to_string().repeat(key_width + 2),
            fill.to_string().repeat(value_width + 2)
        )
    };
    let row = |key: &str, value: &str| {
        format!(
            "| {:<kw$} | {:<vw$} |\n",
            key,
            value,
            kw = key_width,
            vw = value_width
        )
    };

    let mut out = border('-');
    out.push_str(&row("key", "value"));
    out.push_str(&border('='));
    for (key, value) in &lines {
        out.push_str(&row(key, value));
    }
    out.push_str(&border('-'));
    out
}

fn wrap(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in value.split('\n') {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            out.push(String::new());
            continue;
        }
        for chunk in chars.chunks(MAX_CELL_WIDTH) {
            out.push(chunk.iter().collect());
        }
    }
    out
}
