// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod inspect;
pub mod tail;
pub mod timeline;
pub mod verify;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use experience_fabric::Envelope;

const PREVIEW_CHARS: usize = 60;

/// Compact single-line rendering of a payload, cut at `PREVIEW_CHARS`.
pub fn payload_preview(payload: &serde_json::Value) -> String {
    let rendered = payload.to_string();
    if rendered.chars().count() <= PREVIEW_CHARS {
        return rendered;
    }
    let mut cut: String = rendered.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}

pub(crate) fn envelope_table(envelopes: &[Envelope]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Seq", "Timestamp", "Module", "Signal", "Payload"]);

    for envelope in envelopes {
        table.add_row(vec![
            envelope.sequence.to_string(),
            envelope
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            envelope.module.clone(),
            envelope.signal.clone(),
            payload_preview(&envelope.payload),
        ]);
    }
    table
}
