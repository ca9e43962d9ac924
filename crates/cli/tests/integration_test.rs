use experience_fabric::{segment, Fabric, FabricConfig};
use fabric_cli::commands::{inspect, tail, timeline, verify};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::tempdir;

fn record_history(dir: &Path, count: u64) {
    let cfg = FabricConfig::new(dir, 4, 4096, 8)
        .with_allowed_modules(["planning", "reasoning"])
        .with_segment_max_bytes(512);
    let fabric = Fabric::open(cfg).unwrap();
    for n in 0..count {
        let module = if n % 2 == 0 { "planning" } else { "reasoning" };
        fabric.publish(module, "step", json!({ "n": n })).unwrap();
    }
    fabric.shutdown().unwrap();
}

#[test]
fn test_integration_workflow() {
    let dir = tempdir().unwrap();
    record_history(dir.path(), 12);

    assert!(inspect::run(dir.path()).is_ok());
    assert!(verify::run(dir.path()).is_ok(), "Verification should succeed on a clean archive");
    assert!(timeline::run(dir.path(), 0, 5).is_ok());
    assert!(timeline::run(dir.path(), 100, 5).is_ok());
    assert!(tail::run(dir.path(), 3).is_ok());
}

#[test]
fn test_verify_fails_on_flipped_byte() {
    let dir = tempdir().unwrap();
    record_history(dir.path(), 3);

    let path = dir.path().join(segment::segment_file_name(1));
    let len = std::fs::metadata(&path).unwrap().len();
    {
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        // Inside the JSON body of the last frame
        file.seek(SeekFrom::Start(len - 3)).unwrap();
        file.write_all(b"#").unwrap();
    }

    // Inspect still reports; verify must fail
    assert!(inspect::run(dir.path()).is_ok());
    assert!(verify::run(dir.path()).is_err());
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(inspect::run(&missing).is_err());
    assert!(verify::run(&missing).is_err());
}

#[test]
fn test_empty_archive() {
    let dir = tempdir().unwrap();
    assert!(verify::run(dir.path()).is_ok());
    assert!(tail::run(dir.path(), 10).is_ok());
}
