//! Checked byte-range reader used for every on-disk and on-wire decode.
//!
//! Each accessor verifies the remaining length before touching the buffer, so a
//! truncated header or frame surfaces as `VaultError::Parse` instead of a panic.

use bytes::Buf;

use super::error::{Result, VaultError};

pub struct ByteCursor<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    pub fn position(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(VaultError::parse(format!(
                "truncated {}: need {} bytes at {}, have {}",
                what,
                n,
                self.consumed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1, "u8")?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.ensure(4, "u32")?;
        self.consumed += 4;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.ensure(4, "u32")?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.ensure(8, "u64")?;
        self.consumed += 8;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        self.ensure(4, "f32")?;
        self.consumed += 4;
        Ok(self.buf.get_f32_le())
    }

    /// Borrows the next `n` bytes without copying.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n, "byte range")?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        self.consumed += n;
        Ok(head)
    }

    /// Reads a fixed-width, NUL-terminated text field.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.read_slice(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Reads a `u32` little-endian length prefix followed by that many bytes.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32_le()? as usize;
        self.read_slice(len)
    }

    pub fn read_len_prefixed_str(&mut self) -> Result<String> {
        let raw = self.read_len_prefixed()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| VaultError::parse(format!("field is not utf-8: {}", e)))
    }

    pub fn rest(self) -> &'a [u8] {
        self.buf
    }
}

/// Copies `text` into a zero-padded field of `width` bytes, keeping one byte for
/// the terminator and cutting on a character boundary.
pub fn fixed_str_bytes(text: &str, width: usize) -> Vec<u8> {
    let mut cut = text.len().min(width.saturating_sub(1));
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut field = vec![0u8; width];
    field[..cut].copy_from_slice(&text.as_bytes()[..cut]);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_past_end_are_rejected() {
        let data = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 1);
        let err = cursor.read_u32_le().unwrap_err();
        assert!(matches!(err, VaultError::Parse(_)));
        // failed read does not consume
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn fixed_str_truncates_on_char_boundary() {
        let field = fixed_str_bytes("ééé", 4);
        assert_eq!(field.len(), 4);
        assert_eq!(&field[..2], "é".as_bytes());
        assert_eq!(field[3], 0);

        let mut cursor = ByteCursor::new(&field);
        assert_eq!(cursor.read_fixed_str(4).unwrap(), "é");
    }

    #[test]
    fn big_and_little_endian_helpers() {
        let data = [0u8, 0, 8, 3, 3, 8, 0, 0];
        let mut cursor = ByteCursor::new(&data);
        assert_eq!(cursor.read_u32_be().unwrap(), 2051);
        assert_eq!(cursor.read_u32_le().unwrap(), 2051);
    }
}
