// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::envelope_table;
use experience_fabric::Archive;
use std::path::Path;

pub fn run(dir: &Path, limit: usize) -> anyhow::Result<()> {
    let envelopes = Archive::new(dir).tail(limit)?;

    println!("\nLast {} envelope(s)\n", envelopes.len());
    if !envelopes.is_empty() {
        println!("{}\n", envelope_table(&envelopes));
    }
    Ok(())
}
