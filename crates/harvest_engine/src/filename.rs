use std::fmt::Write;

use harvest_core::WorkItem;
use sha2::{Digest, Sha256};

const MAX_ENTITY_LEN: usize = 60;

/// Deterministic, filesystem-safe record filename:
/// `{entity}_{date}_{sequence}_{kind}--{short_hash(identity)}.json`.
///
/// The hash keeps identities distinct even when sanitizing collapses two entities.
pub fn record_filename(item: &WorkItem) -> String {
    format!(
        "{}_{}_{}_{}--{}.json",
        sanitize_entity(&item.entity),
        item.date.format("%Y%m%d"),
        item.sequence,
        item.kind,
        short_hash(&item.identity())
    )
}

fn sanitize_entity(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_ENTITY_LEN));
    for c in input.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' };
        // Collapse runs of replacement characters.
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
        if out.len() >= MAX_ENTITY_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "entity".to_string()
    } else {
        trimmed.to_string()
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
