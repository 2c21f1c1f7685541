//! Chunk frame decoding.
//!
//! ```text
//! structured: [dataset id: 36][file id: 36][offset: u32|u64 LE][chunk ...]
//! legacy:     <dataset id>,<file id>,<offset decimal>,<chunk base64url>
//! ```
//!
//! A comma at byte 36 marks the legacy framing; anything else is structured.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::common::{ByteCursor, OffsetWidth, Result, VaultError};

/// Length of the dataset and file id fields (textual UUIDs).
pub const ID_LEN: usize = 36;

const MIN_FRAME_LEN: usize = ID_LEN + 1;
const LEGACY_DELIMITER: u8 = b',';
const LEGACY_FIELDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Structured,
    Legacy,
}

impl Framing {
    pub fn detect(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(VaultError::parse(format!(
                "frame of {} bytes is too short to carry ids",
                data.len()
            )));
        }
        Ok(if data[ID_LEN] == LEGACY_DELIMITER {
            Framing::Legacy
        } else {
            Framing::Structured
        })
    }
}

/// One decoded chunk. Structured frames borrow their bytes from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFrame<'a> {
    pub dataset_id: String,
    pub file_id: String,
    pub offset: u64,
    pub bytes: Cow<'a, [u8]>,
    /// Explicit completion flag from an envelope; `None` for bare frames.
    pub is_last: Option<bool>,
}

impl<'a> IngestFrame<'a> {
    pub fn decode(data: &'a [u8], offset_width: OffsetWidth) -> Result<Self> {
        match Framing::detect(data)? {
            Framing::Structured => decode_structured(data, offset_width),
            Framing::Legacy => decode_legacy(data),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn decode_structured(data: &[u8], offset_width: OffsetWidth) -> Result<IngestFrame<'_>> {
    let preamble = 2 * ID_LEN + offset_width.bytes();
    if data.len() < preamble {
        return Err(VaultError::parse(format!(
            "structured frame of {} bytes is shorter than its {} byte preamble",
            data.len(),
            preamble
        )));
    }

    let mut cursor = ByteCursor::new(data);
    let dataset_id = read_id(&mut cursor)?;
    let file_id = read_id(&mut cursor)?;
    let offset = match offset_width {
        OffsetWidth::U32 => cursor.read_u32_le()? as u64,
        OffsetWidth::U64 => cursor.read_u64_le()?,
    };

    Ok(IngestFrame {
        dataset_id,
        file_id,
        offset,
        bytes: Cow::Borrowed(cursor.rest()),
        is_last: None,
    })
}

fn read_id(cursor: &mut ByteCursor<'_>) -> Result<String> {
    let raw = cursor.read_slice(ID_LEN)?;
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| VaultError::parse("frame id is not valid text"))
}

pub fn decode_legacy(data: &[u8]) -> Result<IngestFrame<'static>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| VaultError::parse("legacy frame is not valid text"))?;

    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() != LEGACY_FIELDS {
        return Err(VaultError::parse(format!(
            "legacy frame has {} fields, expected {}",
            fields.len(),
            LEGACY_FIELDS
        )));
    }

    let offset = fields[2]
        .trim()
        .parse::<u64>()
        .map_err(|e| VaultError::parse(format!("legacy offset '{}': {}", fields[2], e)))?;
    let bytes = STANDARD.decode(normalize_base64url(fields[3].trim()))?;

    Ok(IngestFrame {
        dataset_id: fields[0].to_string(),
        file_id: fields[1].to_string(),
        offset,
        bytes: Cow::Owned(bytes),
        is_last: None,
    })
}

/// Rewrites URL-safe base64 into the standard alphabet and restores padding.
pub fn normalize_base64url(input: &str) -> String {
    let mut out: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}
