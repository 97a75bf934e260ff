//! NPY structured-array codec for cryoSPARC `.cs` files.
//!
//! A `.cs` file is a numpy `.npy` file holding a 1-D structured array: a
//! preamble (`\x93NUMPY`, version, header length), a Python-literal header
//! describing the record layout, then `shape[0]` packed records.
//!
//! Only the fields the beam-tilt tools touch are decoded. Everything else is
//! kept as raw bytes, and the preamble is written back unchanged.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref DESCR_ENTRY: Regex = Regex::new(
        r"^\(\s*'([^']*)'\s*,\s*'([<>|=]?)([a-zA-Z])(\d*)'\s*(?:,\s*\(([^)]*)\))?\s*,?\s*\)$"
    )
    .unwrap();
    static ref FORTRAN_ORDER: Regex = Regex::new(r"'fortran_order'\s*:\s*(True|False)").unwrap();
    static ref SHAPE: Regex = Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").unwrap();
}

const MAGIC: &[u8] = b"\x93NUMPY";

/// Preamble plus header is padded to a multiple of this many bytes.
const HEADER_ALIGN: usize = 64;

/// Errors that can occur while decoding or editing an NPY record file.
#[derive(Error, Debug)]
pub enum NpyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an NPY file (bad magic)")]
    BadMagic,

    #[error("file truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("data section does not match the header layout: expected {expected} bytes, found {found}")]
    TrailingData { expected: usize, found: usize },

    #[error("invalid NPY header: {0}")]
    InvalidHeader(String),

    #[error("array is not a structured record array")]
    NotStructured,

    #[error("field '{field}' has unsupported dtype '{typestr}'")]
    UnsupportedDtype { field: String, typestr: String },

    #[error("field '{0}' not found")]
    MissingField(String),

    #[error("field '{field}' has dtype {found}, expected {expected}")]
    UnsupportedFieldType {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("field '{field}' row {row} is not valid UTF-8")]
    InvalidUtf8 { field: String, row: usize },

    #[error("value {value} does not fit field '{field}' ({size} bytes)")]
    ValueOutOfRange {
        field: String,
        value: u64,
        size: usize,
    },

    #[error("expected {expected} values, got {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Result type for NPY operations.
pub type Result<T> = std::result::Result<T, NpyError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    /// Single-byte types (`|`).
    Irrelevant,
}

/// Dtype of one structured field, e.g. `<u4` or `|S52` with an optional subarray shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldType {
    pub order: ByteOrder,
    pub kind: char,
    /// Bytes per element.
    pub item_size: usize,
    /// Elements per record (product of the subarray shape).
    pub count: usize,
}

impl FieldType {
    fn parse(field: &str, order: &str, kind: &str, size: &str, shape: Option<&str>) -> Result<Self> {
        let unsupported = || NpyError::UnsupportedDtype {
            field: field.to_string(),
            typestr: format!("{}{}{}", order, kind, size),
        };

        let kind = kind.chars().next().ok_or_else(unsupported)?;
        let size: usize = size.parse().map_err(|_| unsupported())?;
        let item_size = match kind {
            'b' | 'i' | 'u' | 'f' | 'c' | 'S' | 'V' => size,
            // numpy counts UCS-4 code points
            'U' => size.checked_mul(4).ok_or_else(unsupported)?,
            _ => return Err(unsupported()),
        };
        let order = match order {
            ">" => ByteOrder::Big,
            "|" => ByteOrder::Irrelevant,
            // '=' is native order; cryoSPARC only runs on little-endian hosts
            _ => ByteOrder::Little,
        };

        let mut count = 1usize;
        if let Some(shape) = shape {
            for dim in shape.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let dim: usize = dim.parse().map_err(|_| unsupported())?;
                count = count.checked_mul(dim).ok_or_else(unsupported)?;
            }
        }
        item_size.checked_mul(count).ok_or_else(unsupported)?;

        Ok(Self {
            order,
            kind,
            item_size,
            count,
        })
    }

    /// Bytes the field occupies in one record.
    pub fn byte_len(&self) -> usize {
        self.item_size * self.count
    }

    fn describe(&self) -> String {
        let order = match self.order {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::Irrelevant => '|',
        };
        if self.count == 1 {
            format!("{}{}{}", order, self.kind, self.item_size)
        } else {
            format!("{}{}{} x{}", order, self.kind, self.item_size, self.count)
        }
    }

    fn is_scalar_int(&self) -> bool {
        matches!(self.kind, 'i' | 'u') && self.count == 1 && matches!(self.item_size, 1 | 2 | 4 | 8)
    }
}

/// A named field and its byte offset within a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: FieldType,
    pub offset: usize,
}

/// Build an NPY preamble (magic, version, header length, padded header) for `header`.
///
/// `header` is the Python dict literal without trailing padding or newline.
pub fn encode_preamble(header: &str) -> Vec<u8> {
    let unpadded = header.len() + 1;
    let (version, prefix_len) = if MAGIC.len() + 4 + unpadded <= u16::MAX as usize {
        (1u8, MAGIC.len() + 4)
    } else {
        (2u8, MAGIC.len() + 6)
    };
    let total = (prefix_len + unpadded).div_ceil(HEADER_ALIGN) * HEADER_ALIGN;
    let header_len = total - prefix_len;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.push(version);
    out.push(0);
    if version == 1 {
        out.extend_from_slice(&(header_len as u16).to_le_bytes());
    } else {
        out.extend_from_slice(&(header_len as u32).to_le_bytes());
    }
    out.extend_from_slice(header.as_bytes());
    out.resize(total - 1, b' ');
    out.push(b'\n');
    out
}

/// An in-memory cryoSPARC record file.
#[derive(Debug, Clone)]
pub struct CsDataset {
    /// Magic, version, length and header, exactly as read.
    preamble: Vec<u8>,
    fields: Vec<Field>,
    record_size: usize,
    len: usize,
    data: Vec<u8>,
    /// Source file path.
    pub source_path: Option<PathBuf>,
}

impl CsDataset {
    /// Decode an NPY byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic or header is invalid, the array is not a
    /// 1-D C-ordered structured array, or the data section is shorter than
    /// the header promises.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(NpyError::BadMagic);
        }

        let major = bytes[MAGIC.len()];
        let (header_len, header_start) = if major == 1 {
            let raw = [bytes[8], bytes[9]];
            (u16::from_le_bytes(raw) as usize, 10)
        } else {
            if bytes.len() < 12 {
                return Err(NpyError::BadMagic);
            }
            let raw = [bytes[8], bytes[9], bytes[10], bytes[11]];
            (u32::from_le_bytes(raw) as usize, 12)
        };

        let data_start = header_start + header_len;
        if bytes.len() < data_start {
            return Err(NpyError::Truncated {
                expected: data_start,
                found: bytes.len(),
            });
        }

        let header = std::str::from_utf8(&bytes[header_start..data_start])
            .map_err(|_| NpyError::InvalidHeader("header is not UTF-8".to_string()))?;
        let (fields, record_size, len) = parse_header(header)?;

        let expected = record_size
            .checked_mul(len)
            .and_then(|n| n.checked_add(data_start))
            .ok_or_else(|| {
                NpyError::InvalidHeader(format!("{} records of {} bytes overflow", len, record_size))
            })?;
        if bytes.len() < expected {
            return Err(NpyError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(NpyError::TrailingData {
                expected,
                found: bytes.len(),
            });
        }

        let data = bytes.split_off(data_start);
        bytes.truncate(data_start);

        Ok(Self {
            preamble: bytes,
            fields,
            record_size,
            len,
            data,
            source_path: None,
        })
    }

    /// Serialize back to NPY bytes with the original preamble.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.preamble.len() + self.data.len());
        out.extend_from_slice(&self.preamble);
        out.extend_from_slice(&self.data);
        out
    }

    /// Returns the number of records.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per record.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| NpyError::MissingField(name.to_string()))
    }

    fn cell(&self, field: &Field, row: usize) -> &[u8] {
        let start = row * self.record_size + field.offset;
        &self.data[start..start + field.dtype.byte_len()]
    }

    /// Decode a fixed-width byte-string (`S`) field, trailing NULs removed.
    pub fn string_column(&self, name: &str) -> Result<Vec<String>> {
        let field = self.field(name)?;
        if field.dtype.kind != 'S' || field.dtype.count != 1 {
            return Err(NpyError::UnsupportedFieldType {
                field: name.to_string(),
                expected: "byte string (S)",
                found: field.dtype.describe(),
            });
        }

        (0..self.len)
            .map(|row| {
                let raw = self.cell(field, row);
                let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                String::from_utf8(raw[..end].to_vec()).map_err(|_| NpyError::InvalidUtf8 {
                    field: name.to_string(),
                    row,
                })
            })
            .collect()
    }

    fn int_field(&self, name: &str) -> Result<Field> {
        let field = self.field(name)?;
        if !field.dtype.is_scalar_int() {
            return Err(NpyError::UnsupportedFieldType {
                field: name.to_string(),
                expected: "scalar integer (i/u, 1-8 bytes)",
                found: field.dtype.describe(),
            });
        }
        Ok(field.clone())
    }

    /// Read a scalar integer field as `i64` per record.
    pub fn int_column(&self, name: &str) -> Result<Vec<i64>> {
        let field = self.int_field(name)?;
        let size = field.dtype.item_size;

        Ok((0..self.len)
            .map(|row| {
                let raw = self.cell(&field, row);
                let mut buf = [0u8; 8];
                let value = match field.dtype.order {
                    ByteOrder::Big => {
                        buf[8 - size..].copy_from_slice(raw);
                        u64::from_be_bytes(buf)
                    }
                    _ => {
                        buf[..size].copy_from_slice(raw);
                        u64::from_le_bytes(buf)
                    }
                };
                if field.dtype.kind == 'i' && size < 8 {
                    // sign-extend
                    let shift = 64 - size * 8;
                    ((value << shift) as i64) >> shift
                } else {
                    value as i64
                }
            })
            .collect())
    }

    /// Overwrite a scalar integer field with one unsigned value per record.
    ///
    /// No bytes outside the field change. Values that do not fit the
    /// field's width are rejected before anything is written.
    pub fn set_uint_column(&mut self, name: &str, values: &[u32]) -> Result<()> {
        let field = self.int_field(name)?;
        if values.len() != self.len {
            return Err(NpyError::LengthMismatch {
                expected: self.len,
                found: values.len(),
            });
        }

        let size = field.dtype.item_size;
        let bits = size * 8 - usize::from(field.dtype.kind == 'i');
        let max = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        if let Some(&bad) = values.iter().find(|&&v| u64::from(v) > max) {
            return Err(NpyError::ValueOutOfRange {
                field: name.to_string(),
                value: u64::from(bad),
                size,
            });
        }

        for (row, &value) in values.iter().enumerate() {
            let value = u64::from(value);
            let start = row * self.record_size + field.offset;
            let cell = &mut self.data[start..start + size];
            match field.dtype.order {
                ByteOrder::Big => cell.copy_from_slice(&value.to_be_bytes()[8 - size..]),
                _ => cell.copy_from_slice(&value.to_le_bytes()[..size]),
            }
        }

        Ok(())
    }
}

/// Parse the header dict into field layout, record size and record count.
fn parse_header(header: &str) -> Result<(Vec<Field>, usize, usize)> {
    let descr_at = header
        .find("'descr'")
        .ok_or_else(|| NpyError::InvalidHeader("missing 'descr'".to_string()))?;
    let after = header[descr_at + "'descr'".len()..]
        .trim_start()
        .trim_start_matches(':')
        .trim_start();
    if !after.starts_with('[') {
        return Err(NpyError::NotStructured);
    }
    let descr = matching_bracket(after)
        .ok_or_else(|| NpyError::InvalidHeader("unterminated descr list".to_string()))?;

    let mut fields = Vec::new();
    let mut offset = 0usize;
    for entry in descr_entries(descr)? {
        let caps = DESCR_ENTRY
            .captures(entry)
            .ok_or_else(|| NpyError::UnsupportedDtype {
                field: entry_name(entry),
                typestr: entry.to_string(),
            })?;
        let name = caps.get(1).map_or("", |m| m.as_str());
        let dtype = FieldType::parse(
            name,
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(3).map_or("", |m| m.as_str()),
            caps.get(4).map_or("", |m| m.as_str()),
            caps.get(5).map(|m| m.as_str()),
        )?;
        let size = dtype.byte_len();
        fields.push(Field {
            name: name.to_string(),
            dtype,
            offset,
        });
        offset = offset
            .checked_add(size)
            .ok_or_else(|| NpyError::InvalidHeader("record size overflows".to_string()))?;
    }
    if fields.is_empty() {
        return Err(NpyError::NotStructured);
    }

    let fortran = FORTRAN_ORDER
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| NpyError::InvalidHeader("missing 'fortran_order'".to_string()))?;
    if fortran.as_str() == "True" {
        return Err(NpyError::InvalidHeader("fortran-ordered arrays are not supported".to_string()));
    }

    let shape = SHAPE
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| NpyError::InvalidHeader("missing 'shape'".to_string()))?;
    let dims: Vec<&str> = shape
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect();
    if dims.len() != 1 {
        return Err(NpyError::InvalidHeader(format!(
            "expected a 1-D array, shape is ({})",
            shape.as_str()
        )));
    }
    let len: usize = dims[0]
        .parse()
        .map_err(|_| NpyError::InvalidHeader(format!("bad shape ({})", shape.as_str())))?;

    Ok((fields, offset, len))
}

/// Slice of `s` from its leading `[` to the matching `]`, inclusive.
///
/// Brackets inside quoted strings (e.g. `'<M8[us]'`) are ignored.
fn matching_bracket(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a descr list `[(...), (...)]` into its top-level tuple entries.
fn descr_entries(descr: &str) -> Result<Vec<&str>> {
    let inner = &descr[1..descr.len() - 1];
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = None;

    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') | (None, '[') => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            (None, ')') | (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| NpyError::InvalidHeader("unbalanced descr list".to_string()))?;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        entries.push(inner[s..=i].trim());
                    }
                }
            }
            (None, c) if depth == 0 && (c == ',' || c.is_whitespace()) => {}
            (None, _) if depth == 0 => {
                return Err(NpyError::InvalidHeader(format!(
                    "unexpected '{}' in descr list",
                    c
                )));
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(NpyError::InvalidHeader("unbalanced descr list".to_string()));
    }

    Ok(entries)
}

/// Best-effort field name of a descr entry for error messages.
fn entry_name(entry: &str) -> String {
    entry
        .split('\'')
        .nth(1)
        .unwrap_or(entry)
        .to_string()
}
