mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use trace_slicer::cli::cfg::{cfg, CfgArgs};
use trace_slicer::cli::slice::{slice, SliceArgs};
use trace_slicer::TraceBundle;

fn save_bundle(dir: &Path, name: &str, (program, trace): (trace_slicer::Program, trace_slicer::RecordedTrace)) -> PathBuf {
    let path = dir.join(name);
    TraceBundle::new(program, trace).save(&path).unwrap();
    path
}

#[test]
fn test_bundle_survives_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = save_bundle(dir.path(), "heap.json", heap());
    let loaded = TraceBundle::load(&path).unwrap();
    let (program, trace) = heap();

    assert_eq!(loaded.trace, trace);
    assert_eq!(loaded.program.methods().len(), program.methods().len());
    assert_eq!(loaded.program.fields(), program.fields());
}

#[test]
fn test_slice_writes_the_instruction_listing() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "straight.json", straight_line());
    let output = dir.path().join("slice.txt");

    slice(&SliceArgs {
        input_path: input,
        criteria: vec!["Main.main:5:d".to_string()],
        output_path: Some(output.clone()),
        seed: Some(3),
        ..SliceArgs::default()
    })
    .unwrap();

    let listing = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines[0], "Main.main()V");
    assert_eq!(lines.len(), 1 + 8);
    assert!(lines[1].contains("line 1"));
    assert!(lines.iter().any(|l| l.contains("line 4")));
    assert!(!lines.iter().any(|l| l.contains("line 3")));
}

#[test]
fn test_slice_lists_instances_with_distances() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "straight.json", straight_line());
    let output = dir.path().join("instances.txt");

    slice(&SliceArgs {
        input_path: input,
        criteria: vec!["Main.main:5:d".to_string()],
        output_path: Some(output.clone()),
        show_instances: true,
        multithreaded: true,
        ..SliceArgs::default()
    })
    .unwrap();

    let listing = fs::read_to_string(&output).unwrap();
    assert_eq!(listing.lines().count(), 8);
    assert!(listing.lines().next().unwrap().contains("(distance 0)"));
    assert!(listing.contains("(distance 6)"));
}

#[test]
fn test_cfg_exports_dot() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "branching.json", branching(true));
    let dot = dir.path().join("main.dot");

    cfg(&CfgArgs {
        input_path: input,
        method: Some("Main.main".to_string()),
        dot_path: Some(dot.clone()),
        control_dependences: true,
    })
    .unwrap();

    let content = fs::read_to_string(&dot).unwrap();
    assert!(content.starts_with("digraph \"Main.main()V\""));
    assert!(content.contains("4 -> 5 [style=dashed]"));
}

#[test]
fn test_cfg_rejects_unknown_methods() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "branching.json", branching(true));

    let result = cfg(&CfgArgs {
        input_path: input,
        method: Some("Main.nothing".to_string()),
        ..CfgArgs::default()
    });
    assert!(result.is_err());
}

#[test]
fn test_binary_slice_command() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "branching.json", branching(true));

    Command::cargo_bin("trace-slicer")
        .unwrap()
        .arg("slice")
        .arg(&input)
        .arg("Main.main:5:z")
        .assert()
        .success()
        .stdout(predicate::str::contains("Main.main()V"))
        .stdout(predicate::str::contains("Main.square(I)I"))
        .stdout(predicate::str::contains("line 4").not());
}

#[test]
fn test_binary_cfg_command() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "branching.json", branching(true));

    Command::cargo_bin("trace-slicer")
        .unwrap()
        .arg("cfg")
        .arg(&input)
        .arg("--control-dependences")
        .assert()
        .success()
        .stdout(predicate::str::contains("Methods: 2"))
        .stdout(predicate::str::contains("Control dependences:"));
}

#[test]
fn test_binary_rejects_malformed_criteria() {
    let dir = tempfile::tempdir().unwrap();
    let input = save_bundle(dir.path(), "branching.json", branching(true));

    Command::cargo_bin("trace-slicer")
        .unwrap()
        .arg("slice")
        .arg(&input)
        .arg("not a criterion")
        .assert()
        .failure();
}
