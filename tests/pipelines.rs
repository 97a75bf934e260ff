use std::fs;
use std::path::Path;

use beamtilt_groups::core::npy::encode_preamble;
use beamtilt_groups::core::{load_star, CsDataset};
use beamtilt_groups::processors::{
    process_cs_file, process_legacy_file, process_star_file, LegacyError, RunOptions,
};
use beamtilt_groups::BeamTiltConfig;
use tempfile::tempdir;

const RUN_DATA: &str = "\
# version 30001

data_optics

loop_
_rlnOpticsGroupName #1
_rlnOpticsGroup #2
_rlnMicrographOriginalPixelSize #3
_rlnVoltage #4
_rlnSphericalAberration #5
opticsGroup1 1 0.830000 300.000000 2.700000

# version 30001

data_particles

loop_
_rlnCoordinateX #1
_rlnCoordinateY #2
_rlnMicrographName #3
_rlnOpticsGroup #4
1024.0 512.0 Micrographs/FoilHole_30971252_Data_30970979_30970980_20181130_1720-32039.mrc 1
2048.0 256.0 Micrographs/FoilHole_30971253_Data_30970979_30970981_20181130_1721-32040.mrc 1
100.0 300.0 Micrographs/FoilHole_30971254_Data_30970979_30970980_20181130_1722-32041.mrc 1
";

fn cs_bytes(paths: &[&str]) -> Vec<u8> {
    let header = format!(
        "{{'descr': [('uid', '<u8'), ('blob/path', '|S160'), ('ctf/exp_group_id', '<u4'), ('ctf/df1_A', '<f4')], 'fortran_order': False, 'shape': ({},), }}",
        paths.len()
    );
    let mut bytes = encode_preamble(&header);
    for (i, path) in paths.iter().enumerate() {
        bytes.extend_from_slice(&(i as u64 + 42).to_le_bytes());
        let mut blob = path.as_bytes().to_vec();
        blob.resize(160, 0);
        bytes.extend_from_slice(&blob);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&15000.5f32.to_le_bytes());
    }
    bytes
}

fn write(path: &Path, contents: impl AsRef<[u8]>) {
    fs::write(path, contents).unwrap();
}

#[test]
fn star_pipeline_splits_optics_by_class() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run_data.star");
    let output = dir.path().join("run_data_optics.star");
    let csv = dir.path().join("groups.csv");
    write(&input, RUN_DATA);

    let options = RunOptions {
        dry_run: false,
        groups_csv: Some(csv.clone()),
    };
    let report = process_star_file(&input, &output, &BeamTiltConfig::default(), &options).unwrap();

    assert_eq!(report.particles, 3);
    assert_eq!(report.optics_rows, 2);
    assert_eq!(report.output.as_deref(), Some(output.as_path()));

    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(text.matches("# version 30001").count(), 2);

    let doc = load_star(&output).unwrap();
    let optics = doc.table("optics").unwrap();
    assert_eq!(optics.len(), 2);
    assert_eq!(optics.column("_rlnOpticsGroup").unwrap(), vec!["1", "2"]);
    assert_eq!(
        optics.column("_rlnOpticsGroupName").unwrap(),
        vec!["30970980", "30970981"]
    );
    assert_eq!(optics.column("_rlnVoltage").unwrap(), vec!["300.000000", "300.000000"]);
    assert_eq!(
        optics.column("_rlnMicrographOriginalPixelSize").unwrap(),
        vec!["0.830000", "0.830000"]
    );

    let particles = doc.table("particles").unwrap();
    assert_eq!(particles.column("_rlnOpticsGroup").unwrap(), vec!["1", "2", "1"]);
    assert_eq!(
        particles.column("_rlnCoordinateX").unwrap(),
        vec!["1024.0", "2048.0", "100.0"]
    );

    let table = fs::read_to_string(&csv).unwrap();
    assert_eq!(
        table,
        "beamtilt_class,group_id,records\n30970980,1,2\n30970981,2,1\n"
    );

    // input untouched
    assert_eq!(fs::read_to_string(&input).unwrap(), RUN_DATA);
}

#[test]
fn star_pipeline_refuses_to_overwrite_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run_data.star");
    write(&input, RUN_DATA);

    let result = process_star_file(&input, &input, &BeamTiltConfig::default(), &RunOptions::default());

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&input).unwrap(), RUN_DATA);
}

#[test]
fn star_pipeline_same_path_fails_before_reading() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.star");

    let err = process_star_file(&missing, &missing, &BeamTiltConfig::default(), &RunOptions::default())
        .unwrap_err();

    assert!(err.to_string().contains("refusing to overwrite"));
    assert!(!missing.exists());
}

#[test]
fn star_pipeline_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run_data.star");
    let output = dir.path().join("out.star");
    write(&input, RUN_DATA);

    let options = RunOptions {
        dry_run: true,
        groups_csv: None,
    };
    let report = process_star_file(&input, &output, &BeamTiltConfig::default(), &options).unwrap();

    assert_eq!(report.groups.len(), 2);
    assert!(report.output.is_none());
    assert!(!output.exists());
}

#[test]
fn star_pipeline_strict_rejects_unparseable_names() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run_data.star");
    let output = dir.path().join("out.star");
    write(&input, RUN_DATA.replace(
        "Micrographs/FoilHole_30971254_Data_30970979_30970980_20181130_1722-32041.mrc",
        "Micrographs/image.mrc",
    ));

    let mut config = BeamTiltConfig::default();
    config.decode.policy = beamtilt_groups::processors::DecodePolicy::Strict;
    assert!(process_star_file(&input, &output, &config, &RunOptions::default()).is_err());
    assert!(!output.exists());

    // lenient puts it in the default class
    let report = process_star_file(&input, &output, &BeamTiltConfig::default(), &RunOptions::default()).unwrap();
    let classes: Vec<String> = report.groups.iter().map(|g| g.class.to_string()).collect();
    assert_eq!(classes, vec!["1", "30970980", "30970981"]);
}

#[test]
fn cs_pipeline_rewrites_in_place_with_backup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("P1_passthrough_particles.cs");
    let original = cs_bytes(&[
        "J2/imported/FoilHole_30971252_Data_30970979_30970980_20181130_172032.mrc",
        "J2/imported/FoilHole_30971253_Data_30970979_30970979_20181130_172133.mrc",
        "J2/imported/FoilHole_30971254_Data_30970979_30970980_20181130_172234.mrc",
    ]);
    write(&path, &original);

    let report = process_cs_file(&path, &BeamTiltConfig::default(), &RunOptions::default()).unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.groups.len(), 2);
    let (example_path, example_class) = report.example.unwrap();
    assert!(example_path.ends_with("172032.mrc"));
    assert_eq!(example_class.as_str(), "30970980");

    let backup = dir.path().join("P1_passthrough_particles_bak.cs");
    assert_eq!(report.backup.as_deref(), Some(backup.as_path()));
    assert_eq!(fs::read(&backup).unwrap(), original);

    let rewritten = fs::read(&path).unwrap();
    assert_eq!(rewritten.len(), original.len());

    let dataset = CsDataset::from_bytes(rewritten).unwrap();
    assert_eq!(dataset.int_column("ctf/exp_group_id").unwrap(), vec![2, 1, 2]);
    assert_eq!(dataset.int_column("uid").unwrap(), vec![42, 43, 44]);

    let before = CsDataset::from_bytes(original).unwrap();
    assert_eq!(
        dataset.string_column("blob/path").unwrap(),
        before.string_column("blob/path").unwrap()
    );
}

#[test]
fn cs_pipeline_dry_run_leaves_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("particles.cs");
    let original = cs_bytes(&["FoilHole_30971252_Data_30970979_30970980_20181130_172032.mrc"]);
    write(&path, &original);

    let options = RunOptions {
        dry_run: true,
        groups_csv: None,
    };
    let report = process_cs_file(&path, &BeamTiltConfig::default(), &options).unwrap();

    assert!(report.backup.is_none());
    assert_eq!(fs::read(&path).unwrap(), original);
    assert!(!dir.path().join("particles_bak.cs").exists());
}

#[test]
fn cs_pipeline_rejects_non_npy() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.cs");
    write(&path, b"not a numpy file");

    assert!(process_cs_file(&path, &BeamTiltConfig::default(), &RunOptions::default()).is_err());
    assert_eq!(fs::read(&path).unwrap(), b"not a numpy file");
    assert!(!dir.path().join("broken_bak.cs").exists());
}

#[test]
fn legacy_pipeline_appends_class_column() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("run_data.star");
    let output = dir.path().join("run_data_beamtilt_classes.star");

    let mut lines = vec![
        "".to_string(),
        "data_".to_string(),
        "".to_string(),
        "loop_".to_string(),
    ];
    for (i, label) in [
        "_rlnCoordinateX", "_rlnCoordinateY", "_rlnAnglePsi", "_rlnAngleRot", "_rlnAngleTilt",
        "_rlnDefocusU", "_rlnDefocusV", "_rlnDefocusAngle", "_rlnVoltage", "_rlnImageName",
        "_rlnMicrographName",
    ]
    .iter()
    .enumerate()
    {
        lines.push(format!("{} #{}", label, i + 1));
    }
    for (n, class) in ["30970980", "30970981"].iter().enumerate() {
        lines.push(format!(
            "1.0 2.0 3.0 4.0 5.0 6.0 7.0 8.0 300.0 {:06}@Extract/p.mrcs FoilHole_30971252_Data_{}_30970980_20181130_1720-32039.mrc",
            n + 1,
            class
        ));
    }
    write(&input, lines.join("\n"));

    let report = process_legacy_file(&input, &output, &BeamTiltConfig::default()).unwrap();

    assert_eq!(report.rows, 2);
    let written = fs::read_to_string(&output).unwrap();
    let out: Vec<&str> = written.lines().collect();
    assert_eq!(out[15], "_rlnBeamTiltClass #12");
    assert!(out[16].ends_with("-32039.mrc    30970980"));
    assert!(out[17].ends_with("-32039.mrc    30970981"));
}

#[test]
fn legacy_pipeline_missing_input() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.star");

    let err = process_legacy_file(&dir.path().join("Refine3D/job001/run_data.star"), &output, &BeamTiltConfig::default())
        .unwrap_err();

    assert!(matches!(err, LegacyError::InputNotFound(_)));
    assert!(!output.exists());
}
