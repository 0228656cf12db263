use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};

fn pcapost(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pcapost"))
        .args(args)
        .output()
        .expect("failed to run pcapost")
}

fn assert_success(out: &Output) {
    assert!(
        out.status.success(),
        "pcapost failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn write_records(path: &Path, records: &[(String, Value)]) {
    let mut text = String::new();
    for (key, value) in records {
        text.push_str(&json!({ "key": key, "value": value }).to_string());
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

fn read_records(path: &Path) -> Vec<(String, Value)> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let v: Value = serde_json::from_str(l).unwrap();
            (v["key"].as_str().unwrap().to_string(), v["value"].clone())
        })
        .collect()
}

/// Three utterances of 21 frames over 3 classes. The aligned class always
/// has the largest activation.
fn activations_and_alignments() -> (Vec<(String, Value)>, Vec<(String, Value)>) {
    let mut acts = Vec::new();
    let mut alis = Vec::new();
    for u in 0..3usize {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for t in 0..21usize {
            let label = t % 3;
            let mut row = vec![
                0.1 * ((t * 7 + u * 3) % 5) as f32,
                0.2 * ((t * 11 + u) % 4) as f32,
                0.15 * ((t * 13 + u * 5) % 6) as f32,
            ];
            row[label] += 3.0;
            rows.push(row);
            labels.push(label);
        }
        acts.push((format!("utt{u}"), json!(rows)));
        alis.push((format!("utt{u}"), json!(labels)));
    }
    (acts, alis)
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).to_string_lossy().into_owned()
    }
}

#[test]
fn collect_estimate_apply_pipeline() {
    let ws = Workspace::new();
    let (acts, alis) = activations_and_alignments();
    write_records(&ws.path("acts.jsonl"), &acts);
    write_records(&ws.path("ali.jsonl"), &alis);

    let out = pcapost(&[
        "collect-class-samples",
        &ws.arg("acts.jsonl"),
        &ws.arg("ali.jsonl"),
        &ws.arg("samples.jsonl"),
        "--class",
        "0",
        "--apply-log",
    ]);
    assert_success(&out);
    let samples = read_records(&ws.path("samples.jsonl"));
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].0, "0");
    assert_eq!(samples[0].1.as_array().unwrap().len(), 21);

    let out = pcapost(&[
        "estimate-class-pca",
        &ws.arg("samples.jsonl"),
        &ws.arg("bases.jsonl"),
        &ws.arg("means.jsonl"),
        &ws.arg("energy.jsonl"),
    ]);
    assert_success(&out);
    let energy = read_records(&ws.path("energy.jsonl"));
    assert_eq!(energy.len(), 1);
    let table = energy[0].1.as_array().unwrap();
    assert_eq!(table.len(), 101);
    assert_eq!(table[100].as_u64(), Some(3));
    let means = read_records(&ws.path("means.jsonl"));
    assert_eq!(means[0].1.as_array().unwrap().len(), 3);

    let out = pcapost(&[
        "apply-class-transform",
        &ws.arg("acts.jsonl"),
        &ws.arg("ali.jsonl"),
        &ws.arg("bases.jsonl"),
        &ws.arg("means.jsonl"),
        &ws.arg("energy.jsonl"),
        &ws.arg("recon.jsonl"),
    ]);
    assert_success(&out);
    let recon = read_records(&ws.path("recon.jsonl"));
    assert_eq!(recon.len(), 3);
    for (_, matrix) in &recon {
        let rows = matrix.as_array().unwrap();
        assert_eq!(rows.len(), 21);
        for (t, row) in rows.iter().enumerate() {
            let row: Vec<f64> = row
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_f64().unwrap())
                .collect();
            assert_eq!(row.len(), 3);
            assert!(row.iter().all(|v| v.is_finite() && *v > 0.0));
            // Classes 1 and 2 have no transform: one-hot fallback.
            if t % 3 != 0 {
                assert_eq!(row[t % 3], 1.0);
            }
        }
    }
}

#[test]
fn sparsify_then_accumulate_counts() {
    let ws = Workspace::new();
    let posteriors = vec![
        (
            "a".to_string(),
            json!([[0.7, 0.2, 0.1, 0.0], [0.1, 0.6, 0.3, 0.0]]),
        ),
        ("b".to_string(), json!([[0.5, 0.3, 0.2, 0.0]])),
    ];
    write_records(&ws.path("post.jsonl"), &posteriors);

    let out = pcapost(&[
        "sparsify-posteriors",
        &ws.arg("post.jsonl"),
        &ws.arg("sparse.jsonl"),
        "--top-n",
        "2",
    ]);
    assert_success(&out);
    let sparse = read_records(&ws.path("sparse.jsonl"));
    assert_eq!(sparse.len(), 2);
    for (_, frames) in &sparse {
        for frame in frames.as_array().unwrap() {
            let pairs = frame.as_array().unwrap();
            assert_eq!(pairs.len(), 2);
            let mass: f64 = pairs.iter().map(|p| p[1].as_f64().unwrap()).sum();
            assert!((mass - 1.0).abs() < 1e-5);
        }
    }

    let out = pcapost(&[
        "accumulate-counts",
        &ws.arg("sparse.jsonl"),
        &ws.arg("counts.json"),
        "--counts-dim",
        "4",
    ]);
    assert_success(&out);
    let counts: Vec<f64> =
        serde_json::from_str(&fs::read_to_string(ws.path("counts.json")).unwrap()).unwrap();
    assert_eq!(counts.len(), 4);
    // Three frames of unit mass plus smoothing on four classes.
    let total: f64 = counts.iter().sum();
    assert!((total - 5.0).abs() < 1e-4);
    // Class 3 never survives truncation.
    assert_eq!(counts[3], 0.5);
}

#[test]
fn options_file_replaces_flags() {
    let ws = Workspace::new();
    write_records(
        &ws.path("post.jsonl"),
        &[("a".to_string(), json!([[0.5, 0.3, 0.2]]))],
    );
    fs::write(ws.path("opts.yaml"), "percentile: 70\n").unwrap();

    let out = pcapost(&[
        "sparsify-posteriors",
        &ws.arg("post.jsonl"),
        &ws.arg("sparse.jsonl"),
        "-f",
        &ws.arg("opts.yaml"),
    ]);
    assert_success(&out);
    let sparse = read_records(&ws.path("sparse.jsonl"));
    let frame = sparse[0].1[0].as_array().unwrap().clone();
    assert_eq!(frame.len(), 2);
    assert!((frame[0][1].as_f64().unwrap() - 0.625).abs() < 1e-5);
}

#[test]
fn conflicting_flags_fail() {
    let ws = Workspace::new();
    write_records(
        &ws.path("post.jsonl"),
        &[("a".to_string(), json!([[0.5, 0.5]]))],
    );
    let out = pcapost(&[
        "sparsify-posteriors",
        &ws.arg("post.jsonl"),
        &ws.arg("sparse.jsonl"),
        "--top-n",
        "1",
        "--percentile",
        "50",
    ]);
    assert!(!out.status.success());
}

#[test]
fn nothing_processed_fails() {
    let ws = Workspace::new();
    let (acts, _) = activations_and_alignments();
    write_records(&ws.path("acts.jsonl"), &acts);
    // Alignments for unrelated keys only: every utterance is skipped.
    write_records(&ws.path("ali.jsonl"), &[("other".to_string(), json!([0]))]);

    let out = pcapost(&[
        "collect-class-samples",
        &ws.arg("acts.jsonl"),
        &ws.arg("ali.jsonl"),
        &ws.arg("samples.jsonl"),
    ]);
    assert!(!out.status.success());
}

#[test]
fn non_probability_output_is_fatal() {
    let ws = Workspace::new();
    write_records(
        &ws.path("post.jsonl"),
        &[
            ("a".to_string(), json!([[0.5, 0.5]])),
            ("b".to_string(), json!([[1.5, -0.5]])),
        ],
    );
    // Copying emits 1.5 unchanged.
    let out = pcapost(&[
        "sparsify-posteriors",
        &ws.arg("post.jsonl"),
        &ws.arg("sparse.jsonl"),
        "--round-off",
        "false",
    ]);
    assert!(!out.status.success());
}
