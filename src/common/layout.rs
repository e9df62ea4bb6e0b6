//! Packed binary layouts described by format strings.
//!
//! Record and key formats arrive from the catalog as compact strings in the
//! style of `"<i5sd"`: an optional `<` (little-endian, the only byte order
//! supported) followed by `[count]code` items.
//!
//! | Code | Field            | Width        |
//! |------|------------------|--------------|
//! | `i`  | `i32`            | 4            |
//! | `q`  | `i64`            | 8            |
//! | `d`  | `f64`            | 8            |
//! | `s`  | fixed-width text | `count`      |
//! | `c`  | single byte text | 1            |
//!
//! For `s` the count is the width of one field; for every other code the
//! count repeats the field. A [`Layout`] is parsed once and then drives
//! encoding and decoding for every record or key that uses the format, in
//! place of a dedicated Rust type per table.

use super::value::{Row, Value};
use super::{Error, Result};

/// The type and width of one packed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    BigInt,
    Float,
    /// Fixed-width text, NUL-padded on disk and trimmed on read.
    Text(usize),
}

impl FieldKind {
    pub fn width(&self) -> usize {
        match self {
            FieldKind::Int => 4,
            FieldKind::BigInt | FieldKind::Float => 8,
            FieldKind::Text(w) => *w,
        }
    }
}

/// One field of a layout, with its byte offset inside the packed tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub offset: usize,
}

/// A parsed format string: the field offsets and total packed width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    format: String,
    fields: Vec<Field>,
    size: usize,
}

impl Layout {
    /// Parse a format string.
    ///
    /// # Errors
    /// `Error::Format` for unknown codes, zero counts, a big-endian prefix,
    /// or a format with no fields.
    pub fn parse(format: &str) -> Result<Self> {
        let mut fields = Vec::new();
        let mut size = 0usize;
        let mut count: Option<usize> = None;

        for (pos, ch) in format.chars().enumerate() {
            match ch {
                '<' if pos == 0 => {}
                c if c.is_ascii_whitespace() => {}
                c if c.is_ascii_digit() => {
                    let digit = c as usize - '0' as usize;
                    let next = count
                        .unwrap_or(0)
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(digit))
                        .ok_or_else(|| Error::Format(format!("count overflow in {:?}", format)))?;
                    count = Some(next);
                }
                'i' | 'q' | 'd' | 's' | 'c' => {
                    let n = count.take().unwrap_or(1);
                    if n == 0 {
                        return Err(Error::Format(format!(
                            "zero count before '{}' in {:?}",
                            ch, format
                        )));
                    }
                    let (kind, repeat) = match ch {
                        'i' => (FieldKind::Int, n),
                        'q' => (FieldKind::BigInt, n),
                        'd' => (FieldKind::Float, n),
                        's' => (FieldKind::Text(n), 1),
                        _ => (FieldKind::Text(1), n),
                    };
                    for _ in 0..repeat {
                        fields.push(Field { kind, offset: size });
                        size += kind.width();
                    }
                }
                other => {
                    return Err(Error::Format(format!(
                        "unsupported format code '{}' in {:?}",
                        other, format
                    )));
                }
            }
        }

        if count.is_some() {
            return Err(Error::Format(format!("dangling count in {:?}", format)));
        }
        if fields.is_empty() {
            return Err(Error::Format(format!("no fields in {:?}", format)));
        }

        Ok(Self {
            format: format.to_string(),
            fields,
            size,
        })
    }

    /// The format string this layout was parsed from.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields (values per tuple).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Packed width of one tuple in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pack `values` into `out[..self.size()]`.
    ///
    /// # Errors
    /// `Error::Format` if the arity or a value's type doesn't match, or a
    /// string is wider than its field.
    pub fn encode_into(&self, values: &[Value], out: &mut [u8]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::Format(format!(
                "expected {} values for {:?}, got {}",
                self.fields.len(),
                self.format,
                values.len()
            )));
        }
        if out.len() < self.size {
            return Err(Error::Format(format!(
                "buffer of {}B too small for {:?} ({}B)",
                out.len(),
                self.format,
                self.size
            )));
        }

        for (field, value) in self.fields.iter().zip(values) {
            let dst = &mut out[field.offset..field.offset + field.kind.width()];
            match (field.kind, value) {
                (FieldKind::Int, v) => {
                    let n = v
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| mismatch(field.kind, v))?;
                    dst.copy_from_slice(&n.to_le_bytes());
                }
                (FieldKind::BigInt, v) => {
                    let n = v.as_i64().ok_or_else(|| mismatch(field.kind, v))?;
                    dst.copy_from_slice(&n.to_le_bytes());
                }
                (FieldKind::Float, v) => {
                    let n = v.as_f64().ok_or_else(|| mismatch(field.kind, v))?;
                    dst.copy_from_slice(&n.to_le_bytes());
                }
                (FieldKind::Text(width), Value::Str(s)) => {
                    let bytes = s.as_bytes();
                    if bytes.len() > width {
                        return Err(Error::Format(format!(
                            "string of {}B does not fit a {}-byte field",
                            bytes.len(),
                            width
                        )));
                    }
                    dst[..bytes.len()].copy_from_slice(bytes);
                    dst[bytes.len()..].fill(0);
                }
                (kind, v) => return Err(mismatch(kind, v)),
            }
        }
        Ok(())
    }

    /// Pack `values` into a new buffer of exactly `self.size()` bytes.
    pub fn encode(&self, values: &[Value]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.size];
        self.encode_into(values, &mut out)?;
        Ok(out)
    }

    /// Unpack one tuple from the start of `bytes`.
    ///
    /// Text fields lose their trailing NUL padding.
    ///
    /// # Errors
    /// `Error::Corrupted` if `bytes` is shorter than the layout.
    pub fn decode(&self, bytes: &[u8]) -> Result<Row> {
        if bytes.len() < self.size {
            return Err(Error::Corrupted(format!(
                "{}B is too short for {:?} ({}B)",
                bytes.len(),
                self.format,
                self.size
            )));
        }

        let row = self
            .fields
            .iter()
            .map(|field| {
                let src = &bytes[field.offset..field.offset + field.kind.width()];
                match field.kind {
                    FieldKind::Int => Value::Int(i32::from_le_bytes([src[0], src[1], src[2], src[3]])),
                    FieldKind::BigInt => Value::BigInt(i64::from_le_bytes(to_array8(src))),
                    FieldKind::Float => Value::Float(f64::from_le_bytes(to_array8(src))),
                    FieldKind::Text(_) => {
                        let end = src.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                        Value::Str(String::from_utf8_lossy(&src[..end]).into_owned())
                    }
                }
            })
            .collect();
        Ok(row)
    }
}

fn to_array8(src: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    buf
}

fn mismatch(kind: FieldKind, value: &Value) -> Error {
    Error::Format(format!("value {} does not fit field {:?}", value, kind))
}
