//! Configuration types for the beam-tilt grouping tools.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::processors::decoder::DecodePolicy;

/// Filename decoding settings shared by all variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Substring that marks an EPU-style filename
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Class assigned to filenames that do not follow the naming scheme
    #[serde(default = "default_class")]
    pub default_class: String,

    /// Policy for the STAR and cs variants
    #[serde(default = "default_lenient")]
    pub policy: DecodePolicy,

    /// Policy for the legacy line-streaming variant
    #[serde(default = "default_strict")]
    pub legacy_policy: DecodePolicy,
}

fn default_marker() -> String {
    "FoilHole".to_string()
}

fn default_class() -> String {
    "1".to_string()
}

fn default_lenient() -> DecodePolicy {
    DecodePolicy::Lenient
}

fn default_strict() -> DecodePolicy {
    DecodePolicy::Strict
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            default_class: default_class(),
            policy: default_lenient(),
            legacy_policy: default_strict(),
        }
    }
}

/// Block and column names used by the STAR variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarConfig {
    #[serde(default = "default_particles_block")]
    pub particles_block: String,

    #[serde(default = "default_optics_block")]
    pub optics_block: String,

    /// Column holding the source micrograph filename
    #[serde(default = "default_micrograph_column")]
    pub micrograph_column: String,

    /// Group id column, present in both particles and optics tables
    #[serde(default = "default_optics_group_column")]
    pub optics_group_column: String,

    /// Group name column of the optics table
    #[serde(default = "default_optics_group_name_column")]
    pub optics_group_name_column: String,
}

fn default_particles_block() -> String {
    "particles".to_string()
}

fn default_optics_block() -> String {
    "optics".to_string()
}

fn default_micrograph_column() -> String {
    "_rlnMicrographName".to_string()
}

fn default_optics_group_column() -> String {
    "_rlnOpticsGroup".to_string()
}

fn default_optics_group_name_column() -> String {
    "_rlnOpticsGroupName".to_string()
}

impl Default for StarConfig {
    fn default() -> Self {
        Self {
            particles_block: default_particles_block(),
            optics_block: default_optics_block(),
            micrograph_column: default_micrograph_column(),
            optics_group_column: default_optics_group_column(),
            optics_group_name_column: default_optics_group_name_column(),
        }
    }
}

/// Field names used by the cryoSPARC variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsConfig {
    /// Byte-string field holding the particle's source path
    #[serde(default = "default_path_field")]
    pub path_field: String,

    /// Integer field receiving the group id
    #[serde(default = "default_group_field")]
    pub group_field: String,

    /// Inserted between file stem and extension of the backup copy
    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,
}

fn default_path_field() -> String {
    "blob/path".to_string()
}

fn default_group_field() -> String {
    "ctf/exp_group_id".to_string()
}

fn default_backup_suffix() -> String {
    "_bak".to_string()
}

impl Default for CsConfig {
    fn default() -> Self {
        Self {
            path_field: default_path_field(),
            group_field: default_group_field(),
            backup_suffix: default_backup_suffix(),
        }
    }
}

/// Settings for the legacy line-oriented STAR rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    #[serde(default = "default_legacy_input")]
    pub input: PathBuf,

    #[serde(default = "default_legacy_output")]
    pub output: PathBuf,

    /// Leading lines copied without inspection
    #[serde(default = "default_preamble_lines")]
    pub preamble_lines: usize,

    /// Whitespace-separated field holding the filename
    #[serde(default = "default_filename_column")]
    pub filename_column: usize,

    /// Which 8-digit run of the filename is the class
    #[serde(default = "default_class_token_index")]
    pub class_token_index: usize,

    /// Lines up to this length (newline included) pass through unchanged
    #[serde(default = "default_short_line_len")]
    pub short_line_len: usize,

    #[serde(default = "default_header_label")]
    pub header_label: String,
}

fn default_legacy_input() -> PathBuf {
    PathBuf::from("Refine3D/job001/run_data.star")
}

fn default_legacy_output() -> PathBuf {
    PathBuf::from("run_data_beamtilt_classes.star")
}

fn default_preamble_lines() -> usize {
    4
}

fn default_filename_column() -> usize {
    10
}

fn default_class_token_index() -> usize {
    1
}

fn default_short_line_len() -> usize {
    10
}

fn default_header_label() -> String {
    "_rlnBeamTiltClass".to_string()
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            input: default_legacy_input(),
            output: default_legacy_output(),
            preamble_lines: default_preamble_lines(),
            filename_column: default_filename_column(),
            class_token_index: default_class_token_index(),
            short_line_len: default_short_line_len(),
            header_label: default_header_label(),
        }
    }
}

/// Root configuration combining all sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeamTiltConfig {
    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub star: StarConfig,

    #[serde(default)]
    pub cs: CsConfig,

    #[serde(default)]
    pub legacy: LegacyConfig,
}

impl BeamTiltConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: BeamTiltConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
