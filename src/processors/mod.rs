//! Beam-tilt decoding, group numbering and metadata rewriting.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::loaders::StarError;
use crate::core::npy::NpyError;

pub mod decoder;
pub mod exp_groups;
pub mod legacy;
pub mod optics;
pub mod registry;

// Re-export key types for convenience
pub use decoder::{Convention, DecodeError, DecodePolicy, FilenameDecoder};
pub use exp_groups::{assign_exp_groups, decode_cs_classes, process_cs_file, CsReport};
pub use legacy::{process_legacy_file, rewrite_lines, LegacyError, LegacyReport};
pub use optics::{
    assign_particle_groups, find_beamtilt_classes, generate_optics, process_star_file, StarReport,
};
pub use registry::{BeamTiltClass, GroupAssignment, GroupSummary, RegistryError};

/// Errors raised while rewriting group assignments in STAR or cs files.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("input and output are the same file ({0}); refusing to overwrite")]
    SameInputOutput(PathBuf),

    #[error("no records to assign")]
    EmptyInput,

    #[error("optics table has no rows to use as a template")]
    EmptyOptics,

    #[error("optics table has {rows} rows but {classes} beam-tilt classes were found; need one row per class or a single template row")]
    InsufficientOpticsRows { rows: usize, classes: usize },

    #[error("record {row}: {source}")]
    Decode {
        row: usize,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Star(#[from] StarError),

    #[error(transparent)]
    Npy(#[from] NpyError),
}

/// Options shared by the STAR and cs pipelines.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Decode and report without writing the metadata file.
    pub dry_run: bool,
    /// Also write the class/group table to this CSV path.
    pub groups_csv: Option<PathBuf>,
}
