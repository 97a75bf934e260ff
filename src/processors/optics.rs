//! Optics-group assignment for RELION STAR files.
//!
//! Every particle's micrograph name is decoded into a beam-tilt class, the
//! classes are numbered, the optics table is expanded to one row per class
//! and the particles' optics group column is rewritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{BeamTiltConfig, StarConfig};
use crate::core::loaders::{load_star, StarTable};
use crate::core::writers::{write_groups_csv, write_star};
use crate::processors::decoder::{Convention, FilenameDecoder};
use crate::processors::registry::{summarize, BeamTiltClass, GroupAssignment, GroupSummary};
use crate::processors::{RewriteError, RunOptions};

/// Outcome of a STAR run.
#[derive(Debug, Clone)]
pub struct StarReport {
    pub particles: usize,
    pub optics_rows: usize,
    pub groups: Vec<GroupSummary>,
    /// `None` for dry runs.
    pub output: Option<PathBuf>,
}

/// Refuse to run when `output` would overwrite `input`.
pub fn check_distinct_paths(input: &Path, output: &Path) -> std::result::Result<(), RewriteError> {
    let same = input == output
        || match (input.canonicalize(), output.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
    if same {
        return Err(RewriteError::SameInputOutput(input.to_path_buf()));
    }
    Ok(())
}

/// Decode the beam-tilt class of every particle.
pub fn find_beamtilt_classes(
    particles: &StarTable,
    config: &StarConfig,
    decoder: &FilenameDecoder,
) -> std::result::Result<Vec<BeamTiltClass>, RewriteError> {
    let names = particles.require_column(&config.particles_block, &config.micrograph_column)?;

    names
        .iter()
        .enumerate()
        .map(|(row, name)| {
            decoder
                .decode(name)
                .map_err(|source| RewriteError::Decode { row, source })
        })
        .collect()
}

/// Build the new optics table: one row per group, in group id order.
///
/// A single-row optics table serves as template for every group; otherwise
/// group `n` (1-based) copies row `n - 1`, which requires at least as many
/// rows as groups. Only the group name and group id columns differ from the
/// template.
pub fn generate_optics(
    optics: &StarTable,
    assignment: &GroupAssignment,
    config: &StarConfig,
) -> std::result::Result<StarTable, RewriteError> {
    if optics.is_empty() {
        return Err(RewriteError::EmptyOptics);
    }
    if optics.len() != 1 && optics.len() < assignment.len() {
        return Err(RewriteError::InsufficientOpticsRows {
            rows: optics.len(),
            classes: assignment.len(),
        });
    }

    let mut table = StarTable::new(optics.columns.clone());
    for n in 0..assignment.len() {
        let template = if optics.len() == 1 { 0 } else { n };
        table.push_row(optics.rows[template].clone());
    }
    for (n, (class, group_id)) in assignment.iter().enumerate() {
        table.set_value(n, &config.optics_group_name_column, class.to_string());
        table.set_value(n, &config.optics_group_column, group_id.to_string());
    }

    Ok(table)
}

/// Overwrite (or add) the particles' optics group column.
pub fn assign_particle_groups(
    particles: &mut StarTable,
    classes: &[BeamTiltClass],
    assignment: &GroupAssignment,
    config: &StarConfig,
) -> std::result::Result<(), RewriteError> {
    let ids = assignment.map_all(classes)?;
    particles.set_column(
        &config.optics_group_column,
        ids.into_iter().map(|id| id.to_string()).collect(),
    );
    Ok(())
}

/// Assign optics groups by beam-tilt class in a STAR file.
///
/// # Arguments
///
/// * `input` - STAR file with `optics` and `particles` blocks
/// * `output` - Destination; must differ from `input`
/// * `config` - Block/column names and decode settings
/// * `options` - Dry run and optional group table export
///
/// # Errors
///
/// Returns an error if the paths coincide, the input cannot be read or
/// lacks the expected blocks/columns, a filename fails to decode under the
/// strict policy, or the optics table cannot supply one row per class.
pub fn process_star_file(
    input: &Path,
    output: &Path,
    config: &BeamTiltConfig,
    options: &RunOptions,
) -> Result<StarReport> {
    check_distinct_paths(input, output)?;

    log::info!("Processing input file: {}", input.display());
    let mut doc = load_star(input)
        .with_context(|| format!("Failed to read STAR file: {}", input.display()))?;

    let star = &config.star;
    let decoder = FilenameDecoder::from_config(Convention::Sequential, config.decode.policy, &config.decode);

    let particles = doc.table(&star.particles_block)?;
    if particles.is_empty() {
        return Err(RewriteError::EmptyInput.into());
    }
    let classes = find_beamtilt_classes(particles, star, &decoder)
        .with_context(|| format!("Failed to decode micrograph names in {}", input.display()))?;

    let assignment = GroupAssignment::build(&classes);
    let class_list: Vec<&str> = assignment.classes().map(|c| c.as_str()).collect();
    log::info!(
        "Found {} beamtilt classes at position 3 in the filenames: {:?}",
        assignment.len(),
        class_list
    );

    let optics = generate_optics(doc.table(&star.optics_block)?, &assignment, star)?;
    let optics_rows = optics.len();

    let mut particles = doc.table(&star.particles_block)?.clone();
    assign_particle_groups(&mut particles, &classes, &assignment, star)?;
    let particle_count = particles.len();

    doc.replace_table(&star.optics_block, optics);
    doc.replace_table(&star.particles_block, particles);

    let groups = summarize(&assignment, &classes);
    for group in &groups {
        log::debug!(
            "group {} <- class {} ({} particles)",
            group.group_id,
            group.class,
            group.records
        );
    }

    if let Some(csv_path) = &options.groups_csv {
        write_groups_csv(csv_path, &groups)?;
        log::info!("Group table -> {}", csv_path.display());
    }

    let written = if options.dry_run {
        log::info!("Dry run: {} not written", output.display());
        None
    } else {
        write_star(output, &doc, &[&star.optics_block, &star.particles_block])
            .with_context(|| format!("Failed to write STAR file: {}", output.display()))?;
        Some(output.to_path_buf())
    };

    Ok(StarReport {
        particles: particle_count,
        optics_rows,
        groups,
        output: written,
    })
}
