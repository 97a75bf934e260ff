//! Exposure-group assignment for cryoSPARC cs files.
//!
//! The group id field is overwritten in place; record count, layout and every
//! other field stay byte-identical.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{BeamTiltConfig, CsConfig};
use crate::core::loaders::load_cs;
use crate::core::npy::CsDataset;
use crate::core::writers::{make_backup, persist_cs, write_groups_csv};
use crate::processors::decoder::{Convention, FilenameDecoder};
use crate::processors::registry::{summarize, BeamTiltClass, GroupAssignment, GroupSummary};
use crate::processors::{RewriteError, RunOptions};

/// Outcome of a cs run.
#[derive(Debug, Clone)]
pub struct CsReport {
    pub records: usize,
    pub groups: Vec<GroupSummary>,
    /// First record's path and the class decoded from it.
    pub example: Option<(String, BeamTiltClass)>,
    /// `None` for dry runs.
    pub backup: Option<PathBuf>,
}

/// Final path component of a cs blob path.
fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
}

/// Decode the beam-tilt class of every record from its path field's basename.
pub fn decode_cs_classes(
    dataset: &CsDataset,
    config: &CsConfig,
    decoder: &FilenameDecoder,
) -> std::result::Result<Vec<BeamTiltClass>, RewriteError> {
    let paths = dataset.string_column(&config.path_field)?;

    paths
        .iter()
        .enumerate()
        .map(|(row, path)| {
            decoder
                .decode(basename(path))
                .map_err(|source| RewriteError::Decode { row, source })
        })
        .collect()
}

/// Overwrite the group id field with each record's assigned group.
pub fn assign_exp_groups(
    dataset: &mut CsDataset,
    classes: &[BeamTiltClass],
    assignment: &GroupAssignment,
    config: &CsConfig,
) -> std::result::Result<(), RewriteError> {
    let ids = assignment.map_all(classes)?;
    dataset.set_uint_column(&config.group_field, &ids)?;
    Ok(())
}

/// Assign exposure groups by beam-tilt class in a cs file, rewriting it in place.
///
/// The original is copied to `<stem><backup_suffix><ext>` before the
/// rewritten file replaces it.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded, lacks the path or
/// group fields, a filename fails to decode under the strict policy, or the
/// backup or replacement fails.
pub fn process_cs_file(path: &Path, config: &BeamTiltConfig, options: &RunOptions) -> Result<CsReport> {
    let cs = &config.cs;
    let mut dataset =
        load_cs(path).with_context(|| format!("Failed to read cs file: {}", path.display()))?;
    if dataset.is_empty() {
        return Err(RewriteError::EmptyInput.into());
    }

    let decoder = FilenameDecoder::from_config(Convention::BoundedWidth, config.decode.policy, &config.decode);
    let classes = decode_cs_classes(&dataset, cs, &decoder)
        .with_context(|| format!("Failed to decode blob paths in {}", path.display()))?;

    let example = dataset
        .string_column(&cs.path_field)?
        .into_iter()
        .next()
        .zip(classes.first().cloned());
    if let Some((example_path, class)) = &example {
        log::info!("Example path: {}, using: {}", example_path, class);
    }

    let assignment = GroupAssignment::build(&classes);
    let class_list: Vec<&str> = assignment.classes().map(|c| c.as_str()).collect();
    log::info!("Found {} beamtilt classes: {:?}", assignment.len(), class_list);

    assign_exp_groups(&mut dataset, &classes, &assignment, cs)?;
    let groups = summarize(&assignment, &classes);

    if let Some(csv_path) = &options.groups_csv {
        write_groups_csv(csv_path, &groups)?;
        log::info!("Group table -> {}", csv_path.display());
    }

    let backup = if options.dry_run {
        log::info!("Dry run: {} left unchanged", path.display());
        None
    } else {
        let backup = make_backup(path, &cs.backup_suffix)?;
        persist_cs(path, &dataset)
            .with_context(|| format!("Failed to rewrite cs file: {}", path.display()))?;
        Some(backup)
    };

    Ok(CsReport {
        records: dataset.len(),
        groups,
        example,
        backup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::npy::tests::sample_bytes;
    use crate::processors::decoder::DecodePolicy;

    const A: &str = "J3/imported/FoilHole_30971252_Data_30970979_30970980_20181130_172032_patch_aligned.mrc";
    const B: &str = "J3/imported/FoilHole_30971253_Data_30970979_30970979_20181130_172133_patch_aligned.mrc";
    const P: &str = "J3/imported/012345_FoilHole_30971254_Data_30970979_30970981_20181130_172234.mrc";

    fn decoder() -> FilenameDecoder {
        FilenameDecoder::new(Convention::BoundedWidth, DecodePolicy::Lenient)
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("J3/imported/x.mrc"), "x.mrc");
        assert_eq!(basename("x.mrc"), "x.mrc");
    }

    #[test]
    fn test_decode_cs_classes() {
        let dataset = CsDataset::from_bytes(sample_bytes(&[A, B, P, "other.mrc"])).unwrap();
        let classes = decode_cs_classes(&dataset, &CsConfig::default(), &decoder()).unwrap();

        let tokens: Vec<&str> = classes.iter().map(|c| c.as_str()).collect();
        assert_eq!(tokens, vec!["30970980", "30970979", "30970981", "1"]);
    }

    #[test]
    fn test_decode_uses_basename_only() {
        // directory digits would otherwise change the token count
        let path = "J123456/FoilHole_30971252_Data_30970979_30970980_20181130_172032.mrc";
        let dataset = CsDataset::from_bytes(sample_bytes(&[path])).unwrap();
        let classes = decode_cs_classes(&dataset, &CsConfig::default(), &decoder()).unwrap();
        assert_eq!(classes[0].as_str(), "30970980");
    }

    #[test]
    fn test_assign_exp_groups() {
        let mut dataset = CsDataset::from_bytes(sample_bytes(&[A, B, A])).unwrap();
        let config = CsConfig::default();
        let classes = decode_cs_classes(&dataset, &config, &decoder()).unwrap();
        let assignment = GroupAssignment::build(&classes);

        assign_exp_groups(&mut dataset, &classes, &assignment, &config).unwrap();

        assert_eq!(dataset.int_column("ctf/exp_group_id").unwrap(), vec![2, 1, 2]);
        assert_eq!(dataset.int_column("uid").unwrap(), vec![1000, 1001, 1002]);
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn test_missing_path_field() {
        let dataset = CsDataset::from_bytes(sample_bytes(&[A])).unwrap();
        let config = CsConfig {
            path_field: "location/micrograph_path".to_string(),
            ..CsConfig::default()
        };
        let err = decode_cs_classes(&dataset, &config, &decoder()).unwrap_err();
        assert!(matches!(err, RewriteError::Npy(_)));
    }
}
