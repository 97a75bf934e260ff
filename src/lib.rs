//! Optics-group assignment by EPU beam-tilt class.
//!
//! EPU encodes the beam-tilt setting of every exposure in its filename. This
//! crate recovers that class for each particle and writes it back as a
//! per-class group id so downstream refinement can fit aberrations per group:
//! - RELION 3.1+ STAR files: new optics table rows and `_rlnOpticsGroup` values
//! - cryoSPARC cs files: `ctf/exp_group_id` rewritten in place
//! - RELION 3.0 STAR files: a `_rlnBeamTiltClass` column appended line by line
//!
//! # Example
//!
//! ```no_run
//! use beamtilt_groups::{processors::process_star_file, BeamTiltConfig};
//! use beamtilt_groups::processors::RunOptions;
//! use std::path::Path;
//!
//! let report = process_star_file(
//!     Path::new("run_data.star"),
//!     Path::new("run_data_optics.star"),
//!     &BeamTiltConfig::default(),
//!     &RunOptions::default(),
//! )
//! .unwrap();
//! println!("{} optics groups", report.groups.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{BeamTiltConfig, CsConfig, DecodeConfig, LegacyConfig, StarConfig};
pub use processors::{BeamTiltClass, GroupAssignment};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
