// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::envelope_table;
use experience_fabric::{Archive, Cursor};
use std::path::Path;

pub fn run(dir: &Path, from: Cursor, limit: usize) -> anyhow::Result<()> {
    let envelopes = Archive::new(dir).read_range(from, limit)?;

    if envelopes.is_empty() {
        println!("\nNo envelopes after sequence {}\n", from);
        return Ok(());
    }

    println!("\nEvent Timeline\n");
    println!("{}\n", envelope_table(&envelopes));

    if envelopes.len() == limit {
        if let Some(last) = envelopes.last() {
            println!("More available: --from {}\n", last.sequence);
        }
    }
    Ok(())
}
