// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use experience_fabric::Archive;
use std::path::Path;

/// Full scan of every segment. Fails when any frame is corrupt or the
/// sequence has a gap, so the process exits non-zero.
pub fn run(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("archive directory {} does not exist", dir.display());
    }
    let report = Archive::new(dir).verify()?;

    if report.is_healthy() {
        println!("\n✅ VERIFIED\n");
        println!("Segments:  {}", report.segments.len());
        println!("Records:   {}", report.total_records);
        if let Some(last) = report.last_sequence {
            println!("Latest:    {}", last);
        }
        println!("Integrity: CRC64 per frame, gap-free\n");
        return Ok(());
    }

    println!("\n❌ CORRUPTED\n");
    for corruption in report.corruptions() {
        println!(
            "{} @ byte {}: {}",
            corruption.segment.display(),
            corruption.offset,
            corruption.reason
        );
    }
    for gap in &report.gaps {
        println!("Gap: sequence {} followed by {}", gap.after, gap.next);
    }
    println!();

    anyhow::bail!(
        "archive verification failed: {} corrupt segment(s), {} gap(s)",
        report.corruptions().count(),
        report.gaps.len()
    )
}
