//! Command-line interface for the beam-tilt grouping tools.

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::processors::{DecodePolicy, GroupSummary, LegacyError, RunOptions};
use crate::BeamTiltConfig;

#[derive(Parser)]
#[command(name = "beamtilt-groups")]
#[command(about = "Assign optics groups from EPU beam-tilt classes", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the filename decode policy.
#[derive(Args, Debug, Clone, Copy)]
struct PolicyArgs {
    /// Fail on filenames that do not follow the EPU naming scheme
    #[arg(long, conflicts_with = "lenient")]
    strict: bool,

    /// Put filenames that do not follow the EPU naming scheme into the default class
    #[arg(long)]
    lenient: bool,
}

impl PolicyArgs {
    fn resolve(self, configured: DecodePolicy) -> DecodePolicy {
        if self.strict {
            DecodePolicy::Strict
        } else if self.lenient {
            DecodePolicy::Lenient
        } else {
            configured
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Split the optics table of a RELION 3.1+ STAR file by beam-tilt class
    Star {
        /// Input STAR file with optics and particles blocks
        #[arg(long = "i", value_name = "INPUT")]
        input: PathBuf,
        /// Output STAR file (must differ from the input)
        #[arg(long = "o", value_name = "OUTPUT")]
        output: PathBuf,
        /// Also write the class/group table as CSV
        #[arg(long)]
        groups_csv: Option<PathBuf>,
        /// Report the groups without writing the STAR file
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Rewrite ctf/exp_group_id of a cryoSPARC cs file in place (a backup is kept)
    Cs {
        /// cs file to rewrite
        #[arg(long = "i", value_name = "INPUT")]
        input: PathBuf,
        /// Also write the class/group table as CSV
        #[arg(long)]
        groups_csv: Option<PathBuf>,
        /// Report the groups without touching the cs file
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Append a _rlnBeamTiltClass column to a RELION 3.0 run_data.star
    Legacy {
        /// Input STAR file (defaults to the configured Refine3D path)
        #[arg(long = "i", value_name = "INPUT")]
        input: Option<PathBuf>,
        /// Output STAR file (defaults to run_data_beamtilt_classes.star)
        #[arg(long = "o", value_name = "OUTPUT")]
        output: Option<PathBuf>,
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Destination YAML file
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            let head: String = value.chars().take(36).collect();
            format!("{}...", head)
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// One summary line per group: `class -> id (n)`.
fn group_items(groups: &[GroupSummary]) -> Vec<(&'static str, String)> {
    groups
        .iter()
        .map(|g| {
            (
                "Group",
                format!("{} <- {} ({} records)", g.group_id, g.class, g.records),
            )
        })
        .collect()
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match BeamTiltConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                BeamTiltConfig::default()
            }
        },
        None => BeamTiltConfig::default(),
    };

    match cli.command {
        Commands::Star {
            input,
            output,
            groups_csv,
            dry_run,
            policy,
        } => {
            let mut config = config;
            config.decode.policy = policy.resolve(config.decode.policy);
            let options = RunOptions { dry_run, groups_csv };
            cmd_star(&input, &output, &options, &config);
        }
        Commands::Cs {
            input,
            groups_csv,
            dry_run,
            policy,
        } => {
            let mut config = config;
            config.decode.policy = policy.resolve(config.decode.policy);
            let options = RunOptions { dry_run, groups_csv };
            cmd_cs(&input, &options, &config);
        }
        Commands::Legacy {
            input,
            output,
            policy,
        } => {
            let mut config = config;
            config.decode.legacy_policy = policy.resolve(config.decode.legacy_policy);
            let input = input.unwrap_or_else(|| config.legacy.input.clone());
            let output = output.unwrap_or_else(|| config.legacy.output.clone());
            cmd_legacy(&input, &output, &config);
        }
        Commands::InitConfig { path } => cmd_init_config(&path, &config),
    }
}

fn cmd_star(input: &Path, output: &Path, options: &RunOptions, config: &BeamTiltConfig) {
    use crate::processors::optics;

    let start = Instant::now();

    println!("Processing input file: {}", input.display());
    if options.dry_run {
        println!("DRY RUN: No STAR file will be written");
    }

    let spinner = create_spinner("Assigning optics groups...");

    match optics::process_star_file(input, output, config, options) {
        Ok(report) => {
            spinner.finish_and_clear();

            let mut items = vec![
                ("Input file", input.display().to_string()),
                (
                    "Output file",
                    report
                        .output
                        .as_ref()
                        .map_or_else(|| "(dry run)".to_string(), |p| p.display().to_string()),
                ),
                ("Particles", report.particles.to_string()),
                ("Beam-tilt classes", report.groups.len().to_string()),
                ("Optics rows", report.optics_rows.to_string()),
            ];
            items.extend(group_items(&report.groups));
            items.push(("Duration", format!("{:.2?}", start.elapsed())));

            print_summary("Optics Groups Assigned", &items);
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_cs(input: &Path, options: &RunOptions, config: &BeamTiltConfig) {
    use crate::processors::exp_groups;

    let start = Instant::now();

    if options.dry_run {
        println!("DRY RUN: {} will not be modified", input.display());
    }

    let spinner = create_spinner("Assigning exposure groups...");

    match exp_groups::process_cs_file(input, config, options) {
        Ok(report) => {
            spinner.finish_and_clear();

            let mut items = vec![("cs file", input.display().to_string())];
            if let Some((path, class)) = &report.example {
                items.push(("Example path", path.clone()));
                items.push(("Example class", class.to_string()));
            }
            items.push(("Records", report.records.to_string()));
            items.push(("Beam-tilt classes", report.groups.len().to_string()));
            items.extend(group_items(&report.groups));
            items.push((
                "Backup",
                report
                    .backup
                    .as_ref()
                    .map_or_else(|| "(dry run)".to_string(), |p| p.display().to_string()),
            ));
            items.push(("Duration", format!("{:.2?}", start.elapsed())));

            print_summary("Exposure Groups Assigned", &items);
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_legacy(input: &Path, output: &Path, config: &BeamTiltConfig) {
    use crate::processors::legacy;

    match legacy::process_legacy_file(input, output, config) {
        Ok(report) => {
            let mut items = vec![
                ("Input file", input.display().to_string()),
                ("Output file", report.output.display().to_string()),
                ("Rows annotated", report.rows.to_string()),
                ("Beam-tilt classes", report.groups.len().to_string()),
            ];
            items.extend(group_items(&report.groups));
            print_summary("Beam-Tilt Classes Added", &items);
        }
        Err(LegacyError::InputNotFound(path)) => {
            warn!("{} does not exist", path.display());
            println!("\nRefine3D file path is wrong. Please provide the proper path");
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    println!(
        "\n\nAdding beam tilt classes finished! Now import {} with Relion and run CtfRefine",
        output.display()
    );
}

fn cmd_init_config(path: &Path, config: &BeamTiltConfig) {
    match config.to_yaml(path) {
        Ok(()) => println!("Wrote configuration to {}", path.display()),
        Err(e) => {
            error!("Failed to write config to {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}
