//! Data loaders for RELION STAR files and cryoSPARC cs files.
//!
//! This module provides:
//! - An in-memory STAR document model (data blocks, key/value pairs, one loop table per block)
//! - A STAR parser that keeps every token verbatim so untouched fields round-trip
//! - A loader for cryoSPARC `.cs` record files (see [`crate::core::npy`])

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::npy::{CsDataset, NpyError};

/// Errors that can occur while reading or querying STAR data.
#[derive(Error, Debug)]
pub enum StarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: row has {found} values, loop declares {expected} columns")]
    RowWidth {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("data block '{0}' not found")]
    MissingBlock(String),

    #[error("data block '{0}' has no loop table")]
    NoTable(String),

    #[error("column '{column}' not found in block '{block}'")]
    MissingColumn { block: String, column: String },
}

/// Result type for STAR operations.
pub type Result<T> = std::result::Result<T, StarError>;

/// A `loop_` table: named columns and rows of raw tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StarTable {
    /// Column tags including the leading underscore, positional suffix removed.
    pub columns: Vec<String>,
    /// Row-major values, each row as long as `columns`.
    pub rows: Vec<Vec<String>>,
}

impl StarTable {
    /// Creates a table with the given columns and no rows.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Values of one column, failing with [`StarError::MissingColumn`] when absent.
    ///
    /// `block` only names the table's block in the error.
    pub fn require_column(&self, block: &str, name: &str) -> Result<Vec<&str>> {
        self.column(name).ok_or_else(|| StarError::MissingColumn {
            block: block.to_string(),
            column: name.to_string(),
        })
    }

    /// Appends a row. The caller guarantees its width matches `columns`.
    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Overwrite `name` in row `index`, appending the column first if absent.
    /// Other rows hold an empty value in a newly added column.
    pub fn set_value(&mut self, index: usize, name: &str, value: String) {
        let col = self.ensure_column(name);
        if let Some(row) = self.rows.get_mut(index) {
            row[col] = value;
        }
    }

    /// Replace a whole column, appending it if absent.
    ///
    /// `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) {
        debug_assert_eq!(values.len(), self.rows.len());
        let col = self.ensure_column(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[col] = value;
        }
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(String::new());
                }
                self.columns.len() - 1
            }
        }
    }
}

/// One `data_<name>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StarBlock {
    pub name: String,
    /// Comment line preceding `data_<name>`, e.g. `# version 30001`.
    pub comment: Option<String>,
    /// Non-loop `_tag value` items in file order.
    pub pairs: Vec<(String, String)>,
    pub table: Option<StarTable>,
}

impl StarBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            pairs: Vec::new(),
            table: None,
        }
    }

    pub fn with_table(name: impl Into<String>, table: StarTable) -> Self {
        Self {
            name: name.into(),
            comment: None,
            pairs: Vec::new(),
            table: Some(table),
        }
    }
}

/// A parsed STAR file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StarDocument {
    pub blocks: Vec<StarBlock>,
    /// Source file path.
    pub source_path: Option<PathBuf>,
}

impl StarDocument {
    pub fn block(&self, name: &str) -> Option<&StarBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn block_mut(&mut self, name: &str) -> Option<&mut StarBlock> {
        self.blocks.iter_mut().find(|b| b.name == name)
    }

    /// The loop table of block `name`.
    pub fn table(&self, name: &str) -> Result<&StarTable> {
        let block = self
            .block(name)
            .ok_or_else(|| StarError::MissingBlock(name.to_string()))?;
        block
            .table
            .as_ref()
            .ok_or_else(|| StarError::NoTable(name.to_string()))
    }

    /// Replace the table of block `name`, adding the block at the end if absent.
    pub fn replace_table(&mut self, name: &str, table: StarTable) {
        match self.block_mut(name) {
            Some(block) => block.table = Some(table),
            None => self.blocks.push(StarBlock::with_table(name, table)),
        }
    }
}

/// Split a data line into tokens, keeping quoted tokens (quotes included) whole.
fn tokenize(line: &str, line_no: usize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            let mut end = None;
            while let Some((i, ch)) = chars.next() {
                // a quote only closes the token when followed by whitespace or EOL
                let next_is_break = chars.peek().map_or(true, |&(_, n)| n.is_whitespace());
                if ch == c && next_is_break {
                    end = Some(i + ch.len_utf8());
                    break;
                }
            }
            let end = end.ok_or_else(|| StarError::Syntax {
                line: line_no,
                message: format!("unterminated quote in '{}'", line.trim()),
            })?;
            tokens.push(line[start..end].to_string());
        } else {
            let mut end = line.len();
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_whitespace() {
                    end = i;
                    break;
                }
                chars.next();
            }
            tokens.push(line[start..end].to_string());
        }
    }

    Ok(tokens)
}

/// Strip a `#N` positional suffix from a loop header line.
fn column_tag(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    /// Outside any loop.
    Items,
    /// After `loop_`, reading column tags.
    Header,
    /// Reading loop rows.
    Rows,
}

/// Parse STAR text into a document.
///
/// Supports the subset RELION writes: `data_` blocks, `_tag value` pairs and a
/// single `loop_` per block. Blank lines are skipped; the last comment line
/// before a `data_` line is kept as that block's comment, others are dropped.
pub fn parse_star(text: &str) -> Result<StarDocument> {
    let mut doc = StarDocument::default();
    let mut state = State::Items;
    let mut pending_comment: Option<String> = None;

    for (n, raw) in text.lines().enumerate() {
        let line_no = n + 1;
        let line = raw.trim();

        if line.is_empty() {
            if state == State::Rows {
                state = State::Items;
            }
            continue;
        }

        if line.starts_with('#') {
            pending_comment = Some(line.to_string());
            continue;
        }

        if let Some(name) = line.strip_prefix("data_") {
            let mut block = StarBlock::new(name.trim());
            block.comment = pending_comment.take();
            doc.blocks.push(block);
            state = State::Items;
            continue;
        }

        let block = doc.blocks.last_mut().ok_or_else(|| StarError::Syntax {
            line: line_no,
            message: "content before first data_ block".to_string(),
        })?;

        if line == "loop_" {
            if block.table.is_some() {
                return Err(StarError::Syntax {
                    line: line_no,
                    message: format!("block '{}' has more than one loop", block.name),
                });
            }
            block.table = Some(StarTable::default());
            state = State::Header;
            continue;
        }

        match state {
            State::Header if line.starts_with('_') => {
                if let Some(table) = block.table.as_mut() {
                    table.columns.push(column_tag(line));
                }
            }
            State::Header | State::Rows => {
                let table = block.table.as_mut().ok_or_else(|| StarError::Syntax {
                    line: line_no,
                    message: "loop row without loop_".to_string(),
                })?;
                if line.starts_with('_') {
                    return Err(StarError::Syntax {
                        line: line_no,
                        message: format!("tag '{}' after loop rows", column_tag(line)),
                    });
                }
                let row = tokenize(line, line_no)?;
                if row.len() != table.columns.len() {
                    return Err(StarError::RowWidth {
                        line: line_no,
                        expected: table.columns.len(),
                        found: row.len(),
                    });
                }
                table.rows.push(row);
                state = State::Rows;
            }
            State::Items => {
                if !line.starts_with('_') {
                    return Err(StarError::Syntax {
                        line: line_no,
                        message: format!("unexpected value '{}'", line),
                    });
                }
                let mut tokens = tokenize(line, line_no)?.into_iter();
                let tag = tokens.next().unwrap_or_default();
                let value = tokens.collect::<Vec<_>>().join(" ");
                block.pairs.push((tag, value));
            }
        }
    }

    Ok(doc)
}

/// Load a STAR file from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is empty, or is malformed.
pub fn load_star<P: AsRef<Path>>(path: P) -> Result<StarDocument> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;

    let mut doc = parse_star(&text)?;
    if doc.blocks.is_empty() {
        return Err(StarError::EmptyFile(path.to_path_buf()));
    }
    doc.source_path = Some(path.to_path_buf());

    Ok(doc)
}

/// Load a cryoSPARC `.cs` record file into memory.
pub fn load_cs<P: AsRef<Path>>(path: P) -> std::result::Result<CsDataset, NpyError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let mut dataset = CsDataset::from_bytes(bytes)?;
    dataset.source_path = Some(path.to_path_buf());
    Ok(dataset)
}
