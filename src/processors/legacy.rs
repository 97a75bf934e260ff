//! Line-oriented beam-tilt column insertion for RELION 3.0 style STAR files.
//!
//! The file is treated as a plain line stream instead of a parsed document:
//! header lines are copied, one `_rlnBeamTiltClass #N` header is inserted
//! after the header block, and every data row gets the decoded class appended
//! as an extra trailing field.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{BeamTiltConfig, LegacyConfig};
use crate::processors::decoder::{Convention, DecodeError, FilenameDecoder};
use crate::processors::registry::{summarize, BeamTiltClass, GroupAssignment, GroupSummary};

/// Errors that can occur while streaming a legacy STAR file.
#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: header '{text}' has no numeric #N label")]
    BadHeaderLabel { line: usize, text: String },

    #[error("line {line}: data row before any column header")]
    MissingHeader { line: usize },

    #[error("line {line}: no filename in column {column} seen yet")]
    NoFilename { line: usize, column: usize },

    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: DecodeError,
    },
}

/// Result type for legacy streaming operations.
pub type Result<T> = std::result::Result<T, LegacyError>;

/// Rewritten lines plus the class of each annotated data row.
#[derive(Debug, Clone, Default)]
pub struct LegacyOutput {
    pub lines: Vec<String>,
    pub classes: Vec<BeamTiltClass>,
}

/// Outcome of a legacy run.
#[derive(Debug, Clone)]
pub struct LegacyReport {
    pub rows: usize,
    pub groups: Vec<GroupSummary>,
    pub output: PathBuf,
}

/// Column label after the last `#` of a header line, spaces ignored.
fn header_label(line: &str) -> Option<usize> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let (_, label) = compact.rsplit_once('#')?;
    label.parse().ok()
}

/// Stream `lines` through the legacy rewrite.
///
/// The first `preamble_lines` lines pass through untouched. Afterwards, lines
/// starting with `_` are headers; the first other line after a header block
/// triggers the synthesized header. Data lines longer than `short_line_len`
/// (counting their newline) get `    <class>` appended, shorter ones are
/// copied as-is. A row with too few fields reuses the last filename seen.
pub fn rewrite_lines<I, S>(lines: I, config: &LegacyConfig, decoder: &FilenameDecoder) -> Result<LegacyOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = LegacyOutput::default();
    let mut in_header = true;
    let mut last_label: Option<usize> = None;
    let mut last_filename: Option<String> = None;

    for (n, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        let line_no = n + 1;

        if n < config.preamble_lines {
            out.lines.push(line.to_string());
            continue;
        }

        if line.starts_with('_') {
            let label = header_label(line).ok_or_else(|| LegacyError::BadHeaderLabel {
                line: line_no,
                text: line.to_string(),
            })?;
            last_label = Some(label);
            in_header = true;
            out.lines.push(line.to_string());
            continue;
        }

        if in_header {
            let label = last_label.ok_or(LegacyError::MissingHeader { line: line_no })?;
            out.lines.push(format!("{} #{}", config.header_label, label + 1));
            in_header = false;
        }

        if let Some(name) = line.split_whitespace().nth(config.filename_column) {
            last_filename = Some(name.to_string());
        }

        if line.len() + 1 > config.short_line_len {
            let filename = last_filename.as_deref().ok_or(LegacyError::NoFilename {
                line: line_no,
                column: config.filename_column,
            })?;
            let class = decoder
                .decode(filename)
                .map_err(|source| LegacyError::Decode {
                    line: line_no,
                    source,
                })?;
            out.lines.push(format!("{}    {}", line, class));
            out.classes.push(class);
        } else {
            out.lines.push(line.to_string());
        }
    }

    Ok(out)
}

/// Read `input`, append the beam-tilt class column and write `output`.
///
/// # Errors
///
/// Returns [`LegacyError::InputNotFound`] before creating anything if
/// `input` is missing; otherwise propagates read, decode and write errors.
pub fn process_legacy_file(input: &Path, output: &Path, config: &BeamTiltConfig) -> Result<LegacyReport> {
    if !input.is_file() {
        return Err(LegacyError::InputNotFound(input.to_path_buf()));
    }

    log::info!("Reading {}...", input.display());
    let reader = BufReader::new(File::open(input)?);
    let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;

    let legacy = &config.legacy;
    let decoder = FilenameDecoder::from_config(
        Convention::EightDigit {
            index: legacy.class_token_index,
        },
        config.decode.legacy_policy,
        &config.decode,
    );
    let rewritten = rewrite_lines(&lines, legacy, &decoder)?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(output)?);
    for line in &rewritten.lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    let assignment = GroupAssignment::build(&rewritten.classes);
    log::info!(
        "Annotated {} rows with {} beamtilt classes -> {}",
        rewritten.classes.len(),
        assignment.len(),
        output.display()
    );

    Ok(LegacyReport {
        rows: rewritten.classes.len(),
        groups: summarize(&assignment, &rewritten.classes),
        output: output.to_path_buf(),
    })
}
