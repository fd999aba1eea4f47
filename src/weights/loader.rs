//! Parser for the upstream layout-optimizer trace.
//!
//! The offline layout tool emits one operation per line:
//! `<opcode> <comma-separated address tuple> [ignored fields]`. Only `R`
//! and `W` lines contribute to the weight map; everything else, including
//! malformed lines, is skipped silently. A missing file is not an error:
//! it means "no prior knowledge" and the frontend falls back to the live
//! map derived from kernel expansion.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::weights::map::{signature, StaticWeightMap};

/// Tuples with at least this many fields use the full HBM hierarchy
/// layout (bank at index 3); shorter tuples use the simple two-level
/// convention (bank at index 1).
const FULL_HIERARCHY_FIELDS: usize = 5;

/// Build a [`StaticWeightMap`] from a layout trace.
///
/// `num_banks` bounds the accepted bank coordinates; entries outside
/// `[0, num_banks)` are dropped.
pub fn load_static_weights(path: &Path, num_banks: usize) -> StaticWeightMap {
    let mut map = StaticWeightMap::new();

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Static weight trace unavailable, starting with an empty map"
            );
            return map;
        }
    };

    let mut parsed = 0usize;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if parse_line(&line, num_banks, &mut map) {
            parsed += 1;
        }
    }

    debug!(
        path = %path.display(),
        entries = parsed,
        banks = map.occupied_banks(),
        "Loaded static weight trace"
    );
    map
}

/// Parse a single trace line into the map. Returns whether it contributed.
fn parse_line(line: &str, num_banks: usize, map: &mut StaticWeightMap) -> bool {
    let mut fields = line.split_whitespace();
    let Some(head) = fields.next() else {
        return false;
    };
    if head != "R" && head != "W" {
        return false;
    }
    let Some(tuple) = fields.next() else {
        return false;
    };

    let coords: Vec<i64> = match tuple
        .split(',')
        .map(|c| c.trim().parse::<i64>())
        .collect::<Result<_, _>>()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    if coords.is_empty() {
        return false;
    }

    let bank_idx = if coords.len() >= FULL_HIERARCHY_FIELDS {
        3
    } else {
        1
    };
    let Some(&bank) = coords.get(bank_idx) else {
        return false;
    };
    if bank < 0 || bank as usize >= num_banks {
        return false;
    }

    let row = coords.get(bank_idx + 1).copied().unwrap_or(0);
    let column = coords.get(bank_idx + 2).copied().unwrap_or(0);
    map.insert(bank as usize, signature(row, column));
    true
}
