//! Data writers for STAR, cs and CSV outputs.
//!
//! This module provides functions for writing results back to disk:
//! - STAR documents with 1-based positional column labels
//! - cryoSPARC cs files rewritten in place behind a backup copy and an atomic rename
//! - CSV tables of the beam-tilt group assignment

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use super::loaders::StarDocument;
use super::npy::{CsDataset, NpyError};
use crate::processors::registry::GroupSummary;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// A block selected for output carries no loop table.
    #[error("data block '{0}' is not tabular")]
    NotTabular(String),

    /// Source file for a backup does not exist.
    #[error("cannot back up '{0}': file does not exist")]
    MissingSource(String),

    /// Failed to copy the original before rewriting it.
    #[error("failed to back up '{path}' to '{backup}': {source}")]
    Backup {
        path: String,
        backup: String,
        #[source]
        source: std::io::Error,
    },

    /// The freshly written temp file did not decode back to the same shape.
    #[error("verification of rewritten '{path}' failed: {reason}")]
    Verify { path: String, reason: String },

    /// Failed to move the temp file over the original.
    #[error("failed to replace '{path}': {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

/// Render a STAR document to text.
///
/// Every block is written as `data_<name>`, its key/value pairs, then its
/// loop with columns labelled `<tag> #<n>` (1-based). Values are emitted as
/// stored, separated by single spaces.
///
/// # Errors
///
/// Returns [`WriteError::NotTabular`] if a block listed in `require_tables`
/// has no loop.
pub fn render_star(doc: &StarDocument, require_tables: &[&str]) -> Result<String> {
    for name in require_tables {
        let tabular = doc.block(name).is_some_and(|b| b.table.is_some());
        if !tabular {
            return Err(WriteError::NotTabular(name.to_string()));
        }
    }

    let mut out = String::new();
    for block in &doc.blocks {
        if let Some(comment) = &block.comment {
            out.push('\n');
            out.push_str(comment);
            out.push('\n');
        }
        out.push('\n');
        out.push_str("data_");
        out.push_str(&block.name);
        out.push_str("\n\n");

        for (tag, value) in &block.pairs {
            out.push_str(tag);
            out.push(' ');
            out.push_str(value);
            out.push('\n');
        }

        if let Some(table) = &block.table {
            if !block.pairs.is_empty() {
                out.push('\n');
            }
            out.push_str("loop_\n");
            for (n, column) in table.columns.iter().enumerate() {
                out.push_str(&format!("{} #{}\n", column, n + 1));
            }
            for row in &table.rows {
                out.push_str(&row.join(" "));
                out.push('\n');
            }
        }
    }

    Ok(out)
}

/// Write a STAR document to `path`.
///
/// # Errors
///
/// Returns an error if a required block is not tabular, or if the file
/// cannot be created or written to.
pub fn write_star(path: &Path, doc: &StarDocument, require_tables: &[&str]) -> Result<()> {
    let text = render_star(doc, require_tables)?;

    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    writer
        .write_all(text.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| WriteError::WriteFile {
            path: path_str,
            source: e,
        })?;

    log::info!("Saved star file: {}", path.display());
    Ok(())
}

/// Backup location for `path`: `<stem><suffix><.ext>` in the same directory.
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Copy `path` to its backup location, overwriting any previous backup.
///
/// # Errors
///
/// Returns an error if `path` does not exist or the copy fails.
pub fn make_backup(path: &Path, suffix: &str) -> Result<PathBuf> {
    if !path.exists() {
        return Err(WriteError::MissingSource(path.display().to_string()));
    }

    let backup = backup_path(path, suffix);
    fs::copy(path, &backup).map_err(|e| WriteError::Backup {
        path: path.display().to_string(),
        backup: backup.display().to_string(),
        source: e,
    })?;

    log::info!("Backup created: {}", backup.display());
    Ok(backup)
}

/// Replace the cs file at `path` with `dataset`.
///
/// The new bytes go to a temp file in the same directory, which is decoded
/// again and checked against `dataset`'s record count and size before being
/// renamed over `path`. A failure at any step leaves `path` untouched.
pub fn persist_cs(path: &Path, dataset: &CsDataset) -> Result<()> {
    let path_str = path.display().to_string();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let bytes = dataset.to_bytes();
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| WriteError::CreateFile {
        path: dir.display().to_string(),
        source: e,
    })?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| WriteError::WriteFile {
            path: tmp.path().display().to_string(),
            source: e,
        })?;

    let written = fs::read(tmp.path()).map_err(|e| WriteError::WriteFile {
        path: tmp.path().display().to_string(),
        source: e,
    })?;
    let check = CsDataset::from_bytes(written).map_err(|e: NpyError| WriteError::Verify {
        path: path_str.clone(),
        reason: e.to_string(),
    })?;
    if check.len() != dataset.len() || check.record_size() != dataset.record_size() {
        return Err(WriteError::Verify {
            path: path_str,
            reason: format!(
                "expected {} records of {} bytes, read back {} of {}",
                dataset.len(),
                dataset.record_size(),
                check.len(),
                check.record_size()
            ),
        });
    }

    tmp.persist(path).map_err(|e| WriteError::Persist {
        path: path_str,
        source: e.error,
    })?;

    log::info!("Saved file as: {}", path.display());
    Ok(())
}

/// Write the group assignment table to CSV.
///
/// Columns: `beamtilt_class,group_id,records`, one row per group in id order.
pub fn write_groups_csv(path: &Path, groups: &[GroupSummary]) -> Result<()> {
    ensure_parent_dirs(path)?;

    let buf_writer = create_buffered_writer(path)?;
    let mut csv_writer = csv::Writer::from_writer(buf_writer);

    let path_str = path.display().to_string();

    csv_writer
        .write_record(["beamtilt_class", "group_id", "records"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for group in groups {
        csv_writer
            .write_record(&[
                group.class.to_string(),
                group.group_id.to_string(),
                group.records.to_string(),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
