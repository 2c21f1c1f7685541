use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use memmap2::Mmap;
use tracing::{debug, info, instrument, warn};

use super::layout::*;
use crate::common::{ByteCursor, Result, VaultError};
use crate::storage::{remove_if_exists, BinaryFile};

/// Column names addressing the two halves of an image row.
pub const IMAGE_INPUT_COLUMN: &str = "input";
pub const IMAGE_OUTPUT_COLUMN: &str = "output";

/// A dataset container on disk: fixed header, kind-specific header, flat f32 payload.
pub struct DatasetFile {
    file: BinaryFile,
    name: String,
    header: ContainerHeader,
    header_size: u64,
    file_size: u64,
}

impl std::fmt::Debug for DatasetFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetFile")
            .field("path", &self.file.path())
            .field("name", &self.name)
            .field("kind", &self.header.kind())
            .field("header_size", &self.header_size)
            .field("file_size", &self.file_size)
            .finish()
    }
}

fn layout_of(header: &ContainerHeader) -> Result<(u64, u64)> {
    let header_size = header.header_size();
    let file_size = header.file_size().ok_or_else(|| {
        VaultError::parse(format!(
            "container of {} rows x {} values overflows u64",
            header.row_count(),
            header.row_width()
        ))
    })?;
    Ok((header_size, file_size))
}

impl DatasetFile {
    /// Allocates a new container at `path` sized for `header` and writes both headers.
    #[instrument(skip(path, header), fields(file = %path.as_ref().display()))]
    pub fn create(path: impl AsRef<Path>, name: &str, header: ContainerHeader) -> Result<Self> {
        let (header_size, file_size) = layout_of(&header)?;
        let file = BinaryFile::allocate(path.as_ref(), file_size)?;

        let fixed = encode_fixed_header(header.kind(), name);
        file.write_at(0, &fixed)?;

        let container = Self {
            file,
            name: name.to_string(),
            header,
            header_size,
            file_size,
        };
        container.update_header()?;

        debug!(
            kind = ?container.kind(),
            rows = container.row_count(),
            row_width = container.row_width(),
            file_size,
            "container initialized"
        );
        Ok(container)
    }

    /// Creates a container and runs `fill` on it. The file is deleted when
    /// `fill` fails, so no half-written container is left at `path`.
    pub fn create_with(
        path: impl AsRef<Path>,
        name: &str,
        header: ContainerHeader,
        fill: impl FnOnce(&mut DatasetFile) -> Result<()>,
    ) -> Result<Self> {
        let mut container = Self::create(path, name, header)?;
        match fill(&mut container) {
            Ok(()) => Ok(container),
            Err(e) => {
                let path = container.path().to_path_buf();
                if let Err(cleanup) = container.delete() {
                    warn!(file = %path.display(), error = %cleanup, "failed to remove partial container");
                }
                Err(e)
            }
        }
    }

    /// Opens an existing container and derives its layout from the stored counts.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = BinaryFile::open(path.as_ref())?;
        let actual_len = file.len()?;

        let fixed = read_header_bytes(&file, 0, FIXED_HEADER_SIZE)?;
        let (kind, name) = decode_fixed_header(&mut ByteCursor::new(&fixed))?;

        let header = match kind {
            DatasetKind::Image => {
                let raw = read_header_bytes(&file, FIXED_HEADER_SIZE, IMAGE_HEADER_SIZE)?;
                ContainerHeader::decode(kind, &mut ByteCursor::new(&raw))?
            }
            DatasetKind::Table => {
                let mut raw = read_header_bytes(&file, FIXED_HEADER_SIZE, TABLE_HEADER_SIZE)?;
                let column_count = ByteCursor::new(&raw).read_u64_le()?;
                let entries_offset = FIXED_HEADER_SIZE + TABLE_HEADER_SIZE;
                let entries_len = column_count
                    .checked_mul(COLUMN_ENTRY_SIZE)
                    .filter(|len| {
                        entries_offset
                            .checked_add(*len)
                            .map_or(false, |end| end <= actual_len)
                    })
                    .ok_or_else(|| {
                        VaultError::parse(format!(
                            "table header declares {} columns, file holds {} bytes",
                            column_count, actual_len
                        ))
                    })?;
                raw.extend(read_header_bytes(&file, entries_offset, entries_len)?);
                ContainerHeader::decode(kind, &mut ByteCursor::new(&raw))?
            }
        };

        let (header_size, file_size) = layout_of(&header)?;
        if actual_len != file_size {
            warn!(
                path = %file.path().display(),
                expected = file_size,
                actual = actual_len,
                "container length differs from header layout"
            );
        }

        Ok(Self {
            file,
            name,
            header,
            header_size,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DatasetKind {
        self.header.kind()
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Mutable header access for statistics; layout-changing edits are refused
    /// by `update_header`.
    pub fn header_mut(&mut self) -> &mut ContainerHeader {
        &mut self.header
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn row_width(&self) -> u64 {
        self.header.row_width()
    }

    pub fn row_count(&self) -> u64 {
        self.header.row_count()
    }

    pub fn value_count(&self) -> u64 {
        (self.file_size - self.header_size) / VALUE_SIZE
    }

    /// Rewrites the kind-specific header (and table column entries) in place.
    pub fn update_header(&self) -> Result<()> {
        let (header_size, file_size) = layout_of(&self.header)?;
        if header_size != self.header_size || file_size != self.file_size {
            return Err(VaultError::OutOfBounds {
                offset: 0,
                len: file_size,
                limit: self.file_size,
            });
        }

        let mut out = BytesMut::with_capacity((header_size - FIXED_HEADER_SIZE) as usize);
        self.header.encode(&mut out);
        self.file.write_at(FIXED_HEADER_SIZE, &out)
    }

    /// Writes `values` starting at value index `pos` of the payload.
    pub fn add_block(&self, pos: u64, values: &[f32]) -> Result<()> {
        let count = values.len() as u64;
        let end = pos
            .checked_add(count)
            .and_then(|n| n.checked_mul(VALUE_SIZE))
            .and_then(|n| n.checked_add(self.header_size));
        match end {
            Some(end) if end <= self.file_size => {}
            _ => {
                return Err(VaultError::OutOfBounds {
                    offset: self.header_size.saturating_add(pos.saturating_mul(VALUE_SIZE)),
                    len: count * VALUE_SIZE,
                    limit: self.file_size,
                })
            }
        }

        self.file
            .write_at(self.header_size + pos * VALUE_SIZE, &encode_values(values))
    }

    /// Raw payload bytes (everything after the headers).
    pub fn payload(&self) -> Result<Vec<u8>> {
        let len = self.file_size - self.header_size;
        self.ensure_backed(self.header_size, len)?;
        self.file.read_at(self.header_size, len as usize)
    }

    pub fn payload_values(&self) -> Result<Vec<f32>> {
        Ok(decode_values(&self.payload()?))
    }

    /// Values of one column across all rows.
    ///
    /// Table containers address columns by name. Image containers expose
    /// `"input"` (pixels of each row) and `"output"` (label slots of each row).
    pub fn column(&self, name: &str) -> Result<Vec<f32>> {
        let width = self.row_width() as usize;
        let (start, len) = match &self.header {
            ContainerHeader::Table(table) => {
                let index = table
                    .column_index(name)
                    .ok_or_else(|| VaultError::not_found(format!("column '{}'", name)))?;
                (index, 1)
            }
            ContainerHeader::Image(image) => match name {
                IMAGE_INPUT_COLUMN => (0, image.input_size() as usize),
                IMAGE_OUTPUT_COLUMN => (image.input_size() as usize, image.output_count as usize),
                _ => return Err(VaultError::not_found(format!("column '{}'", name))),
            },
        };

        let payload_len = self.file_size - self.header_size;
        self.ensure_backed(self.header_size, payload_len)?;
        if payload_len == 0 || len == 0 {
            return Ok(Vec::new());
        }

        // SAFETY: read-only map; the container file is owned by this handle for the call.
        let mmap = unsafe { Mmap::map(self.file.file())? };
        let payload = &mmap[self.header_size as usize..self.file_size as usize];
        let row_bytes = width * VALUE_SIZE as usize;

        let mut values = Vec::with_capacity(self.row_count() as usize * len);
        for row in payload.chunks_exact(row_bytes) {
            let span = &row[start * VALUE_SIZE as usize..(start + len) * VALUE_SIZE as usize];
            values.extend(decode_values(span));
        }
        Ok(values)
    }

    /// Splits the rows at `floor(ratio * rows)`: the first part stays at this
    /// path, the rest becomes a new container at `new_path`.
    ///
    /// Both spans are read before anything is written. Part two is written in
    /// full first; part one goes to a sibling temp file that is renamed over
    /// the original, so a failure never leaves a half-written original.
    #[instrument(skip(self, new_path), fields(file = %self.path().display()))]
    pub fn split(&mut self, ratio: f32, new_path: impl AsRef<Path>) -> Result<DatasetFile> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(VaultError::InvalidRatio(ratio));
        }
        let new_path = new_path.as_ref();

        let rows = self.row_count();
        // Single-precision product, truncated: 0.9 of 10 rows is 9, not 8.
        let rows_p1 = ((ratio * rows as f32) as u64).min(rows);
        let rows_p2 = rows - rows_p1;
        let width = self.row_width();

        let values = self.payload_values()?;
        let split_at = (rows_p1 * width) as usize;
        let (values_p1, values_p2) = values.split_at(split_at);

        let mut header_p2 = self.header.clone();
        header_p2.set_row_count(rows_p2);
        let part2 = match write_part(new_path, &self.name, header_p2, values_p2) {
            Ok(p2) => p2,
            Err(e) => {
                let _ = remove_if_exists(new_path);
                return Err(e);
            }
        };

        let original = self.path().to_path_buf();
        let staged = staging_sibling(&original);
        let mut header_p1 = self.header.clone();
        header_p1.set_row_count(rows_p1);

        let part1 = match write_part(&staged, &self.name, header_p1, values_p1) {
            Ok(p1) => p1,
            Err(e) => {
                let _ = remove_if_exists(&staged);
                let _ = part2.delete();
                return Err(e);
            }
        };

        let Self { file, .. } = part1;
        let renamed = match file.rename(&original) {
            Ok(path) => path,
            Err(e) => {
                let _ = remove_if_exists(&staged);
                let _ = part2.delete();
                return Err(e);
            }
        };
        *self = DatasetFile::open(renamed)?;

        info!(rows, rows_p1, rows_p2, new_path = %new_path.display(), "container split");
        Ok(part2)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Removes the whole container file.
    pub fn delete(self) -> Result<()> {
        self.file.delete()
    }

    fn ensure_backed(&self, offset: u64, len: u64) -> Result<()> {
        let actual = self.file.len()?;
        if offset + len > actual {
            return Err(VaultError::OutOfBounds {
                offset,
                len,
                limit: actual,
            });
        }
        Ok(())
    }
}

fn write_part(path: &Path, name: &str, header: ContainerHeader, values: &[f32]) -> Result<DatasetFile> {
    let part = DatasetFile::create(path, name, header)?;
    part.add_block(0, values)?;
    part.sync()?;
    Ok(part)
}

fn read_header_bytes(file: &BinaryFile, offset: u64, len: u64) -> Result<Vec<u8>> {
    file.read_at(offset, len as usize).map_err(|e| match e {
        VaultError::OutOfBounds { limit, .. } => VaultError::parse(format!(
            "truncated container header: need {} bytes at {}, file holds {}",
            len, offset, limit
        )),
        other => other,
    })
}

fn staging_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".split-tmp");
    path.with_file_name(name)
}

/// Decodes a little-endian f32 byte run; a trailing partial value is ignored.
pub fn decode_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(VALUE_SIZE as usize)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn encode_values(values: &[f32]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(values.len() * VALUE_SIZE as usize);
    for &value in values {
        out.put_f32_le(value);
    }
    out.to_vec()
}
