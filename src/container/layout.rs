//! Binary layout of a dataset container (little-endian, unpadded).
//!
//! ```text
//! [kind: u8][name: 256 bytes, NUL-terminated]            fixed header, 257 bytes
//! Image: [width u64][height u64][outputs u64][images u64][max f32][avg f32]      40 bytes
//! Table: [columns u64][lines u64] + columns * [name 256][input u8][output u8]
//!                                             [scale f32][avg f32][max f32]      16 + n*270
//! [payload: rows * row_width * f32]
//! ```

use bytes::{BufMut, BytesMut};

use crate::common::cursor::{fixed_str_bytes, ByteCursor};
use crate::common::{Result, VaultError};

pub const NAME_CAPACITY: usize = 256;
pub const FIXED_HEADER_SIZE: u64 = 1 + NAME_CAPACITY as u64;
pub const IMAGE_HEADER_SIZE: u64 = 4 * 8 + 2 * 4;
pub const TABLE_HEADER_SIZE: u64 = 2 * 8;
pub const COLUMN_ENTRY_SIZE: u64 = NAME_CAPACITY as u64 + 2 + 3 * 4;
pub const VALUE_SIZE: u64 = std::mem::size_of::<f32>() as u64;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Image = 1,
    Table = 2,
}

impl TryFrom<u8> for DatasetKind {
    type Error = VaultError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DatasetKind::Image),
            2 => Ok(DatasetKind::Table),
            other => Err(VaultError::UnsupportedKind(other)),
        }
    }
}

/// Operations every kind-specific sub-header provides.
pub trait TypeHeader {
    /// Bytes from the start of the file to the first payload value.
    fn header_size(&self) -> u64;
    /// Values per row.
    fn row_width(&self) -> u64;
    fn row_count(&self) -> u64;
    fn set_row_count(&mut self, rows: u64);
    /// Serializes the sub-header (and column entries) that follow the fixed header.
    fn encode(&self, out: &mut BytesMut);
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImageHeader {
    pub input_width: u64,
    pub input_height: u64,
    pub output_count: u64,
    pub image_count: u64,
    pub max_value: f32,
    pub avg_value: f32,
}

impl ImageHeader {
    pub fn new(input_width: u64, input_height: u64, output_count: u64, image_count: u64) -> Self {
        Self {
            input_width,
            input_height,
            output_count,
            image_count,
            ..Default::default()
        }
    }

    /// Saturates on absurd dimensions; `checked_row_width` tells them apart.
    pub fn input_size(&self) -> u64 {
        self.input_width.saturating_mul(self.input_height)
    }

    /// Values per image plus outputs, or `None` when that overflows u64.
    pub fn checked_row_width(&self) -> Option<u64> {
        self.input_width
            .checked_mul(self.input_height)?
            .checked_add(self.output_count)
    }

    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let header = Self {
            input_width: cursor.read_u64_le()?,
            input_height: cursor.read_u64_le()?,
            output_count: cursor.read_u64_le()?,
            image_count: cursor.read_u64_le()?,
            max_value: cursor.read_f32_le()?,
            avg_value: cursor.read_f32_le()?,
        };
        if header.checked_row_width().is_none() {
            return Err(VaultError::parse(format!(
                "image header {}x{} + {} outputs overflows u64",
                header.input_width, header.input_height, header.output_count
            )));
        }
        Ok(header)
    }
}

impl TypeHeader for ImageHeader {
    fn header_size(&self) -> u64 {
        FIXED_HEADER_SIZE + IMAGE_HEADER_SIZE
    }

    fn row_width(&self) -> u64 {
        self.input_size().saturating_add(self.output_count)
    }

    fn row_count(&self) -> u64 {
        self.image_count
    }

    fn set_row_count(&mut self, rows: u64) {
        self.image_count = rows;
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(self.input_width);
        out.put_u64_le(self.input_height);
        out.put_u64_le(self.output_count);
        out.put_u64_le(self.image_count);
        out.put_f32_le(self.max_value);
        out.put_f32_le(self.avg_value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEntry {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub scale: f32,
    pub avg_value: f32,
    pub max_value: f32,
}

impl ColumnEntry {
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, true, false)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, false, true)
    }

    pub fn new(name: impl Into<String>, is_input: bool, is_output: bool) -> Self {
        Self {
            name: name.into(),
            is_input,
            is_output,
            scale: 1.0,
            avg_value: 0.0,
            max_value: 0.0,
        }
    }

    fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(Self {
            name: cursor.read_fixed_str(NAME_CAPACITY)?,
            is_input: cursor.read_bool()?,
            is_output: cursor.read_bool()?,
            scale: cursor.read_f32_le()?,
            avg_value: cursor.read_f32_le()?,
            max_value: cursor.read_f32_le()?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_slice(&fixed_str_bytes(&self.name, NAME_CAPACITY));
        out.put_u8(self.is_input as u8);
        out.put_u8(self.is_output as u8);
        out.put_f32_le(self.scale);
        out.put_f32_le(self.avg_value);
        out.put_f32_le(self.max_value);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableHeader {
    pub line_count: u64,
    pub columns: Vec<ColumnEntry>,
}

impl TableHeader {
    pub fn new(columns: Vec<ColumnEntry>, line_count: u64) -> Self {
        Self {
            line_count,
            columns,
        }
    }

    pub fn column_count(&self) -> u64 {
        self.columns.len() as u64
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Decodes the counts, then `column_count` entries directly after them.
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let column_count = cursor.read_u64_le()?;
        let line_count = cursor.read_u64_le()?;

        let needed = column_count.checked_mul(COLUMN_ENTRY_SIZE);
        if needed.map_or(true, |n| n > cursor.remaining() as u64) {
            return Err(VaultError::parse(format!(
                "table header declares {} columns but only {} header bytes follow",
                column_count,
                cursor.remaining()
            )));
        }

        let columns = (0..column_count)
            .map(|_| ColumnEntry::decode(cursor))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            line_count,
            columns,
        })
    }
}

impl TypeHeader for TableHeader {
    fn header_size(&self) -> u64 {
        FIXED_HEADER_SIZE + TABLE_HEADER_SIZE + self.column_count() * COLUMN_ENTRY_SIZE
    }

    fn row_width(&self) -> u64 {
        self.column_count()
    }

    fn row_count(&self) -> u64 {
        self.line_count
    }

    fn set_row_count(&mut self, rows: u64) {
        self.line_count = rows;
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(self.column_count());
        out.put_u64_le(self.line_count);
        for column in &self.columns {
            column.encode(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerHeader {
    Image(ImageHeader),
    Table(TableHeader),
}

impl ContainerHeader {
    pub fn kind(&self) -> DatasetKind {
        match self {
            ContainerHeader::Image(_) => DatasetKind::Image,
            ContainerHeader::Table(_) => DatasetKind::Table,
        }
    }

    fn inner(&self) -> &dyn TypeHeader {
        match self {
            ContainerHeader::Image(h) => h,
            ContainerHeader::Table(h) => h,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn TypeHeader {
        match self {
            ContainerHeader::Image(h) => h,
            ContainerHeader::Table(h) => h,
        }
    }

    pub fn as_image(&self) -> Option<&ImageHeader> {
        match self {
            ContainerHeader::Image(h) => Some(h),
            ContainerHeader::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableHeader> {
        match self {
            ContainerHeader::Table(h) => Some(h),
            ContainerHeader::Image(_) => None,
        }
    }

    /// Total file size implied by the header; `None` on arithmetic overflow.
    pub fn file_size(&self) -> Option<u64> {
        let width = match self {
            ContainerHeader::Image(h) => h.checked_row_width()?,
            ContainerHeader::Table(h) => h.row_width(),
        };
        width
            .checked_mul(self.row_count())?
            .checked_mul(VALUE_SIZE)?
            .checked_add(self.header_size())
    }

    /// Parses everything after the fixed header for the given kind.
    pub fn decode(kind: DatasetKind, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        match kind {
            DatasetKind::Image => ImageHeader::decode(cursor).map(ContainerHeader::Image),
            DatasetKind::Table => TableHeader::decode(cursor).map(ContainerHeader::Table),
        }
    }
}

impl TypeHeader for ContainerHeader {
    fn header_size(&self) -> u64 {
        self.inner().header_size()
    }

    fn row_width(&self) -> u64 {
        self.inner().row_width()
    }

    fn row_count(&self) -> u64 {
        self.inner().row_count()
    }

    fn set_row_count(&mut self, rows: u64) {
        self.inner_mut().set_row_count(rows)
    }

    fn encode(&self, out: &mut BytesMut) {
        self.inner().encode(out)
    }
}

/// Serializes the fixed header: kind byte followed by the name field.
pub fn encode_fixed_header(kind: DatasetKind, name: &str) -> BytesMut {
    let mut out = BytesMut::with_capacity(FIXED_HEADER_SIZE as usize);
    out.put_u8(kind as u8);
    out.put_slice(&fixed_str_bytes(name, NAME_CAPACITY));
    out
}

pub fn decode_fixed_header(cursor: &mut ByteCursor<'_>) -> Result<(DatasetKind, String)> {
    let kind = DatasetKind::try_from(cursor.read_u8()?)?;
    let name = cursor.read_fixed_str(NAME_CAPACITY)?;
    Ok((kind, name))
}
