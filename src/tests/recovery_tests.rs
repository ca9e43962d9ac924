// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::archive::Archive;
use crate::codec;
use crate::fabric::Fabric;
use crate::segment;
use crate::tests::support::{config, sequences};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::tempdir;

#[test]
fn test_acknowledged_envelope_survives_crash() {
    let dir = tempdir().unwrap();
    let acknowledged = {
        let fabric = Fabric::open(config(dir.path(), 8)).unwrap();
        fabric.publish("planning", "p.one", json!({"a": 1})).unwrap();
        let e = fabric.publish("planning", "p.two", json!({"a": 2})).unwrap();
        // Dropped without shutdown: nothing but the fsync'd frames remains
        e
    };

    let archive = Archive::new(dir.path());
    assert_eq!(archive.latest_sequence().unwrap(), 2);
    let recovered = archive.read_range(1, 1).unwrap();
    assert_eq!(recovered[0], *acknowledged);
}

#[test]
fn test_torn_tail_truncated_and_sequence_continues() {
    let dir = tempdir().unwrap();
    {
        let fabric = Fabric::open(config(dir.path(), 8)).unwrap();
        for n in 0..3 {
            fabric.publish("action", "a.step", json!({ "n": n })).unwrap();
        }
    }

    // Half a frame from an admission that never returned
    let segment_path = dir.path().join(segment::segment_file_name(1));
    let ghost = crate::Envelope {
        id: uuid::Uuid::new_v4(),
        module: "action".to_string(),
        signal: "a.step".to_string(),
        payload: json!({"n": 3}),
        timestamp: chrono::Utc::now(),
        sequence: 4,
    };
    let frame = codec::encode_frame(&ghost).unwrap();
    {
        let mut file = OpenOptions::new().append(true).open(&segment_path).unwrap();
        file.write_all(&frame[..frame.len() - 5]).unwrap();
    }

    let fabric = Fabric::open(config(dir.path(), 8)).unwrap();
    assert_eq!(fabric.latest_sequence(), 3);
    let next = fabric.publish("action", "a.step", json!({"n": "after"})).unwrap();
    assert_eq!(next.sequence, 4);
    assert_ne!(next.id, ghost.id);

    assert!(Archive::new(dir.path()).verify().unwrap().is_healthy());
    assert_eq!(sequences(&fabric.since(0).unwrap()), vec![1, 2, 3, 4]);
}

#[test]
fn test_rollover_keeps_continuity_across_restart() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path(), 4).with_segment_max_bytes(700);
    {
        let fabric = Fabric::open(cfg.clone()).unwrap();
        for n in 0..12 {
            fabric.publish("knowledge", "k.fact", json!({ "n": n })).unwrap();
        }
    }
    let fabric = Fabric::open(cfg).unwrap();
    for n in 12..16 {
        fabric.publish("knowledge", "k.fact", json!({ "n": n })).unwrap();
    }

    let report = Archive::new(dir.path()).verify().unwrap();
    assert!(report.segments.len() > 2);
    assert!(report.is_healthy());
    assert_eq!(report.total_records, 16);
    assert_eq!(report.last_sequence, Some(16));

    let replayed = fabric.since(0).unwrap();
    assert_eq!(sequences(&replayed), (1..=16).collect::<Vec<u64>>());
    for (i, e) in replayed.iter().enumerate() {
        assert_eq!(e.payload["n"], i);
    }
}

#[test]
fn test_restart_warms_ring_and_timestamps() {
    let dir = tempdir().unwrap();
    let last_before = {
        let fabric = Fabric::open(config(dir.path(), 3)).unwrap();
        let mut last = None;
        for n in 0..5 {
            last = Some(fabric.publish("learning", "l.sample", json!({ "n": n })).unwrap());
        }
        fabric.shutdown().unwrap();
        last.unwrap()
    };

    let fabric = Fabric::open(config(dir.path(), 3)).unwrap();
    assert_eq!(sequences(&fabric.snapshot(10)), vec![3, 4, 5]);
    assert_eq!(fabric.status().oldest_retained, Some(3));

    let next = fabric.publish("learning", "l.sample", json!({})).unwrap();
    assert_eq!(next.sequence, 6);
    assert!(next.timestamp >= last_before.timestamp);
}

#[test]
fn test_shutdown_rejects_publish() {
    let dir = tempdir().unwrap();
    let fabric = Fabric::open(config(dir.path(), 3)).unwrap();
    fabric.publish("planning", "p", json!({})).unwrap();
    fabric.shutdown().unwrap();

    assert!(matches!(
        fabric.publish("planning", "p", json!({})),
        Err(crate::FabricError::Closed)
    ));
    assert!(fabric.status().closed);
    assert_eq!(fabric.since(0).unwrap().len(), 1);
}

#[test]
fn test_mid_segment_damage_never_reuses_sequences() {
    let dir = tempdir().unwrap();
    {
        let fabric = Fabric::open(config(dir.path(), 8)).unwrap();
        for n in 0..5 {
            fabric.publish("planning", "p.step", json!({ "n": n })).unwrap();
        }
    }

    let segment_path = dir.path().join(segment::segment_file_name(1));
    let bytes = std::fs::read(&segment_path).unwrap();
    let first_len = {
        let mut reader = &bytes[..];
        codec::read_frame(&mut reader).unwrap().unwrap().len
    };
    {
        let mut file = OpenOptions::new().write(true).open(&segment_path).unwrap();
        file.seek(SeekFrom::Start(first_len + codec::FRAME_HEADER_SIZE as u64 + 2))
            .unwrap();
        file.write_all(b"#").unwrap();
    }

    assert!(matches!(
        Fabric::open(config(dir.path(), 8)),
        Err(crate::FabricError::ArchiveCorrupted { .. })
    ));
    // Frames 3..=5 were not cut off
    assert_eq!(std::fs::metadata(&segment_path).unwrap().len(), bytes.len() as u64);
}
