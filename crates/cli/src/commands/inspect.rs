// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use experience_fabric::Archive;
use std::path::Path;

pub fn run(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("archive directory {} does not exist", dir.display());
    }
    let report = Archive::new(dir).verify()?;

    println!("\nFabric Archive: {}", dir.display());
    println!("--------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Segment", "Records", "First", "Last", "Bytes", "Status"]);

    for segment in &report.segments {
        let name = segment
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let status = match &segment.corruption {
            None => "OK".to_string(),
            Some(c) if c.is_torn_tail() => format!("TORN TAIL @{}", c.offset),
            Some(c) => format!("CORRUPT @{}: {}", c.offset, c.reason),
        };
        table.add_row(vec![
            name,
            segment.records.to_string(),
            segment.first_sequence.to_string(),
            segment
                .last_sequence
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            segment.bytes.to_string(),
            status,
        ]);
    }

    println!("{table}\n");
    match (report.first_sequence, report.last_sequence) {
        (Some(first), Some(last)) => println!(
            "{} records, sequences {}..={}\n",
            report.total_records, first, last
        ),
        _ => println!("Archive is empty\n"),
    }

    Ok(())
}
